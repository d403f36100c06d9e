use std::path::PathBuf;

/// XDG app name for config and state locations.
pub const APP_NAME: &str = "mcpd";

/// Environment variable overriding the declarative config path.
pub const CONFIG_FILE_ENV: &str = "MCPD_CONFIG_FILE";
/// Environment variable overriding the runtime-vars path.
pub const RUNTIME_FILE_ENV: &str = "MCPD_RUNTIME_FILE";

fn xdg_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

fn xdg_state_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| {
        dirs.state_dir()
            .unwrap_or_else(|| dirs.data_local_dir())
            .to_path_buf()
    })
}

/// Resolve the declarative config path: flag > `MCPD_CONFIG_FILE` > XDG default.
pub fn config_file_path(flag_override: Option<PathBuf>) -> PathBuf {
    resolve(flag_override, CONFIG_FILE_ENV, || {
        xdg_config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    })
}

/// Resolve the runtime-vars path: flag > `MCPD_RUNTIME_FILE` > XDG default.
///
/// Lives in the state dir rather than the config dir; it carries
/// secrets and is edited by tooling, not by hand.
pub fn runtime_vars_path(flag_override: Option<PathBuf>) -> PathBuf {
    resolve(flag_override, RUNTIME_FILE_ENV, || {
        xdg_state_dir()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("{APP_NAME}-state")))
            .join("secrets.toml")
    })
}

fn resolve(flag_override: Option<PathBuf>, env_key: &str, default: impl Fn() -> PathBuf) -> PathBuf {
    if let Some(path) = flag_override {
        return path;
    }
    if let Ok(path) = std::env::var(env_key) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    default()
}
