//! Configuration loading, validation, and aggregation for mcpd.
//!
//! Two on-disk documents feed the daemon: the declarative server list
//! (`config.toml`) and the per-server runtime-vars file holding env,
//! args, and volume mappings. The aggregator merges both into the
//! validated [`ServerSpec`] set the supervisor runs from.

pub mod aggregate;
pub mod config;
pub mod daemon;
pub mod paths;
pub mod runtime_vars;

pub use aggregate::{ServerSpec, aggregate};
pub use config::{ConfigFile, PackageRef, Runtime, ServerEntry};
pub use daemon::{CorsConfig, DaemonConfig, DaemonIntervals, DaemonOverrides, DaemonTimeouts};
pub use paths::{config_file_path, runtime_vars_path};
pub use runtime_vars::{RuntimeVars, ServerVars};
