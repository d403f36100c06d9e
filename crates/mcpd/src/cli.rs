use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use mcpd_config::DaemonOverrides;

/// Parse `10s` / `1m30s` style durations.
fn duration(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw).map_err(|error| error.to_string())
}

#[derive(Parser, Debug)]
#[command(name = "mcpd", version)]
#[command(about = "Aggregator and router for a fleet of MCP servers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Declarative config file (default: $MCPD_CONFIG_FILE, then XDG)
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,

    /// Runtime-vars file (default: $MCPD_RUNTIME_FILE, then XDG state dir)
    #[arg(long, global = true)]
    pub runtime_file: Option<PathBuf>,

    /// Log file (default: $MCPD_LOG_PATH, then stderr)
    #[arg(long, global = true)]
    pub log_path: Option<PathBuf>,

    /// Log level filter (default: $MCPD_LOG_LEVEL, then "info")
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the aggregation daemon
    Daemon(DaemonArgs),

    /// Inspect configuration without starting anything
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate config and runtime-vars, including aggregation
    Validate,
}

#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Bind the API to 127.0.0.1:8090 for local development
    #[arg(long, conflicts_with = "addr")]
    pub dev: bool,

    /// API listen address, e.g. 0.0.0.0:8090
    #[arg(long)]
    pub addr: Option<SocketAddr>,

    /// Enable CORS; requires at least one --cors-allow-origin
    #[arg(long)]
    pub cors_enable: bool,

    /// Allowed CORS origin (repeatable)
    #[arg(long = "cors-allow-origin", value_name = "ORIGIN")]
    pub cors_allow_origins: Vec<String>,

    /// Allowed CORS method (repeatable)
    #[arg(long = "cors-allow-method", value_name = "METHOD")]
    pub cors_allow_methods: Vec<String>,

    /// Allowed CORS request header (repeatable)
    #[arg(long = "cors-allow-header", value_name = "HEADER")]
    pub cors_allow_headers: Vec<String>,

    /// Exposed CORS response header (repeatable)
    #[arg(long = "cors-expose-header", value_name = "HEADER")]
    pub cors_expose_headers: Vec<String>,

    /// Allow credentialed CORS requests
    #[arg(long)]
    pub cors_allow_credentials: bool,

    /// Preflight cache duration, e.g. 1h
    #[arg(long, value_parser = duration, value_name = "DURATION")]
    pub cors_max_age: Option<Duration>,

    /// Drain window for in-flight API requests on shutdown
    #[arg(long, value_parser = duration, value_name = "DURATION")]
    pub timeout_api_shutdown: Option<Duration>,

    /// Deadline for the MCP init handshake per server
    #[arg(long, value_parser = duration, value_name = "DURATION")]
    pub timeout_mcp_init: Option<Duration>,

    /// Deadline for one MCP health probe
    #[arg(long, value_parser = duration, value_name = "DURATION")]
    pub timeout_mcp_health: Option<Duration>,

    /// Graceful-stop window per server before signal escalation
    #[arg(long, value_parser = duration, value_name = "DURATION")]
    pub timeout_mcp_shutdown: Option<Duration>,

    /// Time between MCP health probes
    #[arg(long, value_parser = duration, value_name = "DURATION")]
    pub interval_mcp_health: Option<Duration>,
}

impl DaemonArgs {
    /// Flags become overrides; switch-type flags only override when
    /// actually given.
    pub fn overrides(&self) -> DaemonOverrides {
        DaemonOverrides {
            dev: self.dev,
            addr: self.addr,
            cors_enable: self.cors_enable.then_some(true),
            cors_allow_origins: self.cors_allow_origins.clone(),
            cors_allow_methods: self.cors_allow_methods.clone(),
            cors_allow_headers: self.cors_allow_headers.clone(),
            cors_expose_headers: self.cors_expose_headers.clone(),
            cors_allow_credentials: self.cors_allow_credentials.then_some(true),
            cors_max_age: self.cors_max_age,
            timeout_api_shutdown: self.timeout_api_shutdown,
            timeout_mcp_init: self.timeout_mcp_init,
            timeout_mcp_health: self.timeout_mcp_health,
            timeout_mcp_shutdown: self.timeout_mcp_shutdown,
            interval_mcp_health: self.interval_mcp_health,
        }
    }
}
