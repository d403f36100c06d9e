use mcpd_core::DaemonError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

use crate::config::{ConfigFile, Runtime, ServerEntry};
use crate::runtime_vars::RuntimeVars;

/// Normalized, fully-resolved description of one MCP server: the
/// declarative entry merged with its runtime-vars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSpec {
    pub name: String,
    pub runtime: Runtime,
    pub package: String,
    pub version: String,
    /// Tool allow-list; empty means every advertised tool is exposed.
    pub allowed_tools: Vec<String>,
    pub required_env: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub required_positional_args: Vec<String>,
    pub required_value_args: Vec<String>,
    pub required_bool_args: Vec<String>,
    pub args: Vec<String>,
    /// Logical name → expanded host path.
    pub volumes: BTreeMap<String, String>,
    /// Source-of-truth volume entries; persisted unchanged.
    pub raw_volumes: Vec<String>,
}

impl ServerSpec {
    /// Stable content hash used by the reload differ. Identical
    /// inputs always hash identically; map fields are ordered so the
    /// hash does not depend on iteration order.
    pub fn spec_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut feed = |label: &str, value: &str| {
            hasher.update(label.as_bytes());
            hasher.update([0x1f]);
            hasher.update(value.as_bytes());
            hasher.update([0x1e]);
        };

        feed("name", &self.name);
        feed("runtime", self.runtime.as_str());
        feed("package", &self.package);
        feed("version", &self.version);
        for tool in &self.allowed_tools {
            feed("tool", tool);
        }
        for (key, value) in &self.env {
            feed("env", &format!("{key}={value}"));
        }
        for arg in &self.args {
            feed("arg", arg);
        }
        for raw in &self.raw_volumes {
            feed("volume", raw);
        }

        format!("{:x}", hasher.finalize())
    }
}

/// Merge the declarative server list with runtime-vars into the
/// validated spec set the supervisor runs from.
///
/// Fail-fast: the first server that cannot be satisfied rejects the
/// whole set, so a reload never applies a partially-valid config.
pub fn aggregate(config: &ConfigFile, vars: &RuntimeVars) -> Result<Vec<ServerSpec>, DaemonError> {
    config.validate()?;

    let mut specs = Vec::with_capacity(config.servers.len());
    for entry in &config.servers {
        specs.push(build_spec(entry, vars)?);
    }
    Ok(specs)
}

fn build_spec(entry: &ServerEntry, vars: &RuntimeVars) -> Result<ServerSpec, DaemonError> {
    let package = entry.package_ref()?;
    let server_vars = vars.vars_for(&entry.name);

    let missing_env: Vec<&str> = entry
        .required_env
        .iter()
        .filter(|key| !server_vars.env.contains_key(*key))
        .map(String::as_str)
        .collect();
    if !missing_env.is_empty() {
        return Err(DaemonError::spec_unsatisfied(format!(
            "server '{}' is missing required environment variable(s): {}",
            entry.name,
            missing_env.join(", ")
        ))
        .with_details(serde_json::json!({
            "server": entry.name,
            "missingEnv": missing_env,
        })));
    }

    let unsatisfied = unsatisfied_args(entry, &server_vars.args);
    if !unsatisfied.is_empty() {
        return Err(DaemonError::spec_unsatisfied(format!(
            "server '{}' is missing required argument(s): {}",
            entry.name,
            unsatisfied.join(", ")
        ))
        .with_details(serde_json::json!({
            "server": entry.name,
            "missingArgs": unsatisfied,
        })));
    }

    Ok(ServerSpec {
        name: entry.name.clone(),
        runtime: package.runtime,
        package: package.name,
        version: package.version,
        allowed_tools: entry.tools.clone(),
        required_env: entry.required_env.clone(),
        env: server_vars.env.into_iter().collect(),
        required_positional_args: entry.required_positional_args.clone(),
        required_value_args: entry.required_value_args.clone(),
        required_bool_args: entry.required_bool_args.clone(),
        args: server_vars.args,
        volumes: server_vars.volumes,
        raw_volumes: server_vars.raw_volumes,
    })
}

/// Check declared required args against the runtime args list.
///
/// Recognized forms: `--key=value`, `--key value` (when `--key` is a
/// declared value arg), bare `--flag`, and bare positionals. A `--`
/// token ends flag parsing; everything after is positional.
fn unsatisfied_args(entry: &ServerEntry, args: &[String]) -> Vec<String> {
    let value_keys: HashSet<&str> = entry
        .required_value_args
        .iter()
        .map(|key| key.trim_start_matches("--"))
        .collect();

    let mut seen_values: HashSet<&str> = HashSet::new();
    let mut seen_flags: HashSet<&str> = HashSet::new();
    let mut positionals = 0usize;

    let mut index = 0;
    let mut flags_done = false;
    while index < args.len() {
        let token = args[index].as_str();
        if flags_done {
            positionals += 1;
            index += 1;
            continue;
        }
        if token == "--" {
            flags_done = true;
            index += 1;
            continue;
        }
        if let Some(stripped) = token.strip_prefix("--") {
            if let Some((key, _value)) = stripped.split_once('=') {
                seen_values.insert(key);
                seen_flags.insert(key);
            } else if value_keys.contains(stripped)
                && args
                    .get(index + 1)
                    .is_some_and(|next| !next.starts_with("--"))
            {
                seen_values.insert(stripped);
                seen_flags.insert(stripped);
                index += 1;
            } else {
                seen_flags.insert(stripped);
            }
        } else {
            positionals += 1;
        }
        index += 1;
    }

    let mut unsatisfied = Vec::new();
    for key in &entry.required_value_args {
        if !seen_values.contains(key.trim_start_matches("--")) {
            unsatisfied.push(format!("{key}=<value>"));
        }
    }
    for key in &entry.required_bool_args {
        if !seen_flags.contains(key.trim_start_matches("--")) {
            unsatisfied.push(key.clone());
        }
    }
    if positionals < entry.required_positional_args.len() {
        for name in &entry.required_positional_args[positionals..] {
            unsatisfied.push(format!("<{name}>"));
        }
    }
    unsatisfied
}
