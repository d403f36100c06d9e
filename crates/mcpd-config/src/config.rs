use mcpd_core::DaemonError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::daemon::DaemonSection;

/// Package-executing environment that knows how to launch one
/// package kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Uvx,
    Npx,
    Docker,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uvx => "uvx",
            Self::Npx => "npx",
            Self::Docker => "docker",
        }
    }

    /// Binary invoked on the host for this runtime.
    pub fn binary(&self) -> &'static str {
        self.as_str()
    }
}

impl std::str::FromStr for Runtime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uvx" => Ok(Self::Uvx),
            "npx" => Ok(Self::Npx),
            "docker" => Ok(Self::Docker),
            other => Err(format!(
                "unknown runtime '{other}' (expected: uvx, npx, docker)"
            )),
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded `runtime::package@version` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRef {
    pub runtime: Runtime,
    pub name: String,
    pub version: String,
}

impl PackageRef {
    /// Decode `runtime '::' pkg '@' version`.
    ///
    /// The version split uses the last `@` so scoped npm packages
    /// (`@modelcontextprotocol/server-github@2025.1.1`) decode.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (runtime_str, rest) = raw
            .split_once("::")
            .ok_or_else(|| format!("package '{raw}' missing '::' runtime separator"))?;
        let runtime: Runtime = runtime_str.parse()?;

        let (name, version) = rest
            .rsplit_once('@')
            .ok_or_else(|| format!("package '{raw}' missing '@' version pin"))?;
        if name.is_empty() {
            return Err(format!("package '{raw}' has an empty package name"));
        }
        if version.is_empty() {
            return Err(format!("package '{raw}' has an empty version"));
        }

        Ok(Self {
            runtime,
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

impl std::fmt::Display for PackageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}@{}", self.runtime, self.name, self.version)
    }
}

/// One declared server in the config file.
///
/// ```toml
/// [[servers]]
/// name = "time"
/// package = "uvx::mcp-server-time@2025.1.1"
/// tools = ["get_current_time"]
/// requiredEnv = ["TZ_DATABASE"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerEntry {
    pub name: String,
    /// `runtime::pkg@version` encoded reference.
    pub package: String,
    /// Tool allow-list; empty means every advertised tool is exposed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_env: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_positional_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_value_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_bool_args: Vec<String>,
}

impl ServerEntry {
    pub fn package_ref(&self) -> Result<PackageRef, DaemonError> {
        PackageRef::parse(&self.package).map_err(|reason| {
            DaemonError::config_invalid(format!("server '{}': {reason}", self.name))
        })
    }
}

/// Declarative config file: the server list plus an optional
/// `[daemon]` section mirroring the daemon flag surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon: Option<DaemonSection>,
}

impl ConfigFile {
    /// Load and validate the declarative config.
    pub fn load(path: &Path) -> Result<Self, DaemonError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            DaemonError::config_invalid(format!(
                "failed to read config file {}: {error}",
                path.display()
            ))
        })?;
        let config: Self = toml::from_str(&raw).map_err(|error| {
            DaemonError::config_invalid(format!(
                "failed to parse config file {}: {error}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation: unique names, decodable package refs.
    pub fn validate(&self) -> Result<(), DaemonError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for entry in &self.servers {
            if entry.name.is_empty() {
                return Err(DaemonError::config_invalid(
                    "server entry with empty name".to_string(),
                ));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(DaemonError::config_invalid(format!(
                    "duplicate server name '{}'",
                    entry.name
                )));
            }
            entry.package_ref()?;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), DaemonError> {
        let raw = toml::to_string_pretty(self).map_err(|error| {
            DaemonError::internal(format!("failed to encode config: {error}"))
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                DaemonError::internal(format!(
                    "failed to create config directory {}: {error}",
                    parent.display()
                ))
            })?;
        }
        std::fs::write(path, raw).map_err(|error| {
            DaemonError::internal(format!(
                "failed to write config file {}: {error}",
                path.display()
            ))
        })
    }
}
