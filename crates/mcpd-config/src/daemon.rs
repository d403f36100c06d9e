use mcpd_core::DaemonError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8090";
pub const DEV_ADDR: &str = "127.0.0.1:8090";

pub const DEFAULT_TIMEOUT_API_SHUTDOWN: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT_MCP_INIT: Duration = Duration::from_secs(30);
pub const DEFAULT_TIMEOUT_MCP_HEALTH: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT_MCP_SHUTDOWN: Duration = Duration::from_secs(5);
pub const DEFAULT_INTERVAL_MCP_HEALTH: Duration = Duration::from_secs(10);

/// `[daemon]` section of the config file. All durations are
/// humantime strings (`"5s"`, `"1m30s"`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DaemonSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<IntervalSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CorsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_origins: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_headers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expose_headers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_credentials: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
}

impl CorsSection {
    /// True when any option besides `enable` is set.
    fn has_policy_options(&self) -> bool {
        !self.allow_origins.is_empty()
            || !self.allow_methods.is_empty()
            || !self.allow_headers.is_empty()
            || !self.expose_headers.is_empty()
            || self.allow_credentials.is_some()
            || self.max_age.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimeoutSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_shutdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_init: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_health: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_shutdown: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IntervalSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_health: Option<String>,
}

/// Flag/env overrides collected by the CLI. Each set field wins over
/// the config file and triggers a warning when it replaces a
/// file-provided value.
#[derive(Debug, Clone, Default)]
pub struct DaemonOverrides {
    pub dev: bool,
    pub addr: Option<SocketAddr>,
    pub cors_enable: Option<bool>,
    pub cors_allow_origins: Vec<String>,
    pub cors_allow_methods: Vec<String>,
    pub cors_allow_headers: Vec<String>,
    pub cors_expose_headers: Vec<String>,
    pub cors_allow_credentials: Option<bool>,
    pub cors_max_age: Option<Duration>,
    pub timeout_api_shutdown: Option<Duration>,
    pub timeout_mcp_init: Option<Duration>,
    pub timeout_mcp_health: Option<Duration>,
    pub timeout_mcp_shutdown: Option<Duration>,
    pub interval_mcp_health: Option<Duration>,
}

impl DaemonOverrides {
    fn has_cors_policy_options(&self) -> bool {
        !self.cors_allow_origins.is_empty()
            || !self.cors_allow_methods.is_empty()
            || !self.cors_allow_headers.is_empty()
            || !self.cors_expose_headers.is_empty()
            || self.cors_allow_credentials.is_some()
            || self.cors_max_age.is_some()
    }
}

/// Resolved CORS policy, only present when enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonTimeouts {
    pub api_shutdown: Duration,
    pub mcp_init: Duration,
    pub mcp_health: Duration,
    pub mcp_shutdown: Duration,
}

impl Default for DaemonTimeouts {
    fn default() -> Self {
        Self {
            api_shutdown: DEFAULT_TIMEOUT_API_SHUTDOWN,
            mcp_init: DEFAULT_TIMEOUT_MCP_INIT,
            mcp_health: DEFAULT_TIMEOUT_MCP_HEALTH,
            mcp_shutdown: DEFAULT_TIMEOUT_MCP_SHUTDOWN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonIntervals {
    pub mcp_health: Duration,
}

impl Default for DaemonIntervals {
    fn default() -> Self {
        Self {
            mcp_health: DEFAULT_INTERVAL_MCP_HEALTH,
        }
    }
}

/// Fully-resolved daemon configuration. Loaded once at startup;
/// reload only replaces the server set, never these values.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub addr: SocketAddr,
    pub cors: Option<CorsConfig>,
    pub timeouts: DaemonTimeouts,
    pub intervals: DaemonIntervals,
}

impl DaemonConfig {
    /// Merge precedence: flags over file over defaults, warning on
    /// each flag that replaces a file-provided value.
    pub fn resolve(
        section: Option<&DaemonSection>,
        overrides: &DaemonOverrides,
    ) -> Result<Self, DaemonError> {
        let file = section.cloned().unwrap_or_default();

        let file_addr = file
            .addr
            .as_deref()
            .map(|raw| {
                raw.parse::<SocketAddr>().map_err(|error| {
                    DaemonError::config_invalid(format!("invalid daemon addr '{raw}': {error}"))
                })
            })
            .transpose()?;

        let addr = if overrides.dev {
            if file_addr.is_some() {
                tracing::warn!(addr = DEV_ADDR, "--dev overrides daemon addr from config file");
            }
            DEV_ADDR.parse().expect("dev addr literal")
        } else if let Some(addr) = overrides.addr {
            if file_addr.is_some() {
                tracing::warn!(%addr, "--addr overrides daemon addr from config file");
            }
            addr
        } else {
            file_addr.unwrap_or_else(|| DEFAULT_ADDR.parse().expect("default addr literal"))
        };

        let file_timeout = file.timeout.clone().unwrap_or_default();
        let timeouts = DaemonTimeouts {
            api_shutdown: pick_duration(
                "timeout.apiShutdown",
                overrides.timeout_api_shutdown,
                file_timeout.api_shutdown.as_deref(),
                DEFAULT_TIMEOUT_API_SHUTDOWN,
            )?,
            mcp_init: pick_duration(
                "timeout.mcpInit",
                overrides.timeout_mcp_init,
                file_timeout.mcp_init.as_deref(),
                DEFAULT_TIMEOUT_MCP_INIT,
            )?,
            mcp_health: pick_duration(
                "timeout.mcpHealth",
                overrides.timeout_mcp_health,
                file_timeout.mcp_health.as_deref(),
                DEFAULT_TIMEOUT_MCP_HEALTH,
            )?,
            mcp_shutdown: pick_duration(
                "timeout.mcpShutdown",
                overrides.timeout_mcp_shutdown,
                file_timeout.mcp_shutdown.as_deref(),
                DEFAULT_TIMEOUT_MCP_SHUTDOWN,
            )?,
        };

        let file_interval = file.interval.clone().unwrap_or_default();
        let intervals = DaemonIntervals {
            mcp_health: pick_duration(
                "interval.mcpHealth",
                overrides.interval_mcp_health,
                file_interval.mcp_health.as_deref(),
                DEFAULT_INTERVAL_MCP_HEALTH,
            )?,
        };

        let cors = resolve_cors(file.cors.as_ref(), overrides)?;

        Ok(Self {
            addr,
            cors,
            timeouts,
            intervals,
        })
    }
}

fn resolve_cors(
    section: Option<&CorsSection>,
    overrides: &DaemonOverrides,
) -> Result<Option<CorsConfig>, DaemonError> {
    let file = section.cloned().unwrap_or_default();

    let enabled = match (overrides.cors_enable, file.enable) {
        (Some(flag), Some(from_file)) => {
            if flag != from_file {
                tracing::warn!(enable = flag, "--cors-enable overrides cors.enable from config file");
            }
            flag
        }
        (Some(flag), None) => flag,
        (None, Some(from_file)) => from_file,
        (None, None) => false,
    };

    if !enabled {
        if file.has_policy_options() || overrides.has_cors_policy_options() {
            return Err(DaemonError::config_invalid(
                "cors options are set but cors is not enabled; \
                 set cors.enable = true or drop the other cors options",
            ));
        }
        return Ok(None);
    }

    let allow_origins = pick_list(
        "cors.allowOrigins",
        &overrides.cors_allow_origins,
        &file.allow_origins,
    );
    if allow_origins.is_empty() {
        return Err(DaemonError::config_invalid(
            "cors is enabled but no allowed origin is configured",
        ));
    }

    let allow_methods = pick_list(
        "cors.allowMethods",
        &overrides.cors_allow_methods,
        &file.allow_methods,
    );
    let allow_headers = pick_list(
        "cors.allowHeaders",
        &overrides.cors_allow_headers,
        &file.allow_headers,
    );
    let expose_headers = pick_list(
        "cors.exposeHeaders",
        &overrides.cors_expose_headers,
        &file.expose_headers,
    );

    let allow_credentials = match (overrides.cors_allow_credentials, file.allow_credentials) {
        (Some(flag), Some(_)) => {
            tracing::warn!(
                "--cors-allow-credentials overrides cors.allowCredentials from config file"
            );
            flag
        }
        (Some(flag), None) => flag,
        (None, Some(from_file)) => from_file,
        (None, None) => false,
    };

    let file_max_age = file
        .max_age
        .as_deref()
        .map(|raw| parse_duration("cors.maxAge", raw))
        .transpose()?;
    let max_age = match (overrides.cors_max_age, file_max_age) {
        (Some(flag), Some(_)) => {
            tracing::warn!("--cors-max-age overrides cors.maxAge from config file");
            Some(flag)
        }
        (Some(flag), None) => Some(flag),
        (None, from_file) => from_file,
    };

    Ok(Some(CorsConfig {
        allow_origins,
        allow_methods,
        allow_headers,
        expose_headers,
        allow_credentials,
        max_age,
    }))
}

fn pick_list(key: &str, flag: &[String], file: &[String]) -> Vec<String> {
    if !flag.is_empty() {
        if !file.is_empty() {
            tracing::warn!(key, "flag overrides {key} from config file");
        }
        return flag.to_vec();
    }
    file.to_vec()
}

fn pick_duration(
    key: &str,
    flag: Option<Duration>,
    file: Option<&str>,
    default: Duration,
) -> Result<Duration, DaemonError> {
    let file_value = file.map(|raw| parse_duration(key, raw)).transpose()?;
    match (flag, file_value) {
        (Some(value), Some(_)) => {
            tracing::warn!(key, value = ?value, "flag overrides {key} from config file");
            Ok(value)
        }
        (Some(value), None) => Ok(value),
        (None, Some(value)) => Ok(value),
        (None, None) => Ok(default),
    }
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration, DaemonError> {
    humantime::parse_duration(raw).map_err(|error| {
        DaemonError::config_invalid(format!("invalid duration for {key}: '{raw}' ({error})"))
    })
}
