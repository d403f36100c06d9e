use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

mod cli;

use cli::{Cli, Commands, ConfigCommands};
use mcpd_config::{ConfigFile, DaemonConfig, RuntimeVars, aggregate};
use mcpd_daemon::DaemonPaths;

const LOG_PATH_ENV: &str = "MCPD_LOG_PATH";
const LOG_LEVEL_ENV: &str = "MCPD_LOG_LEVEL";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_path.clone(), cli.log_level.clone())?;

    let paths = DaemonPaths {
        config_file: mcpd_config::config_file_path(cli.config_file.clone()),
        runtime_file: mcpd_config::runtime_vars_path(cli.runtime_file.clone()),
    };

    match cli.command {
        Commands::Daemon(args) => {
            let config_file = ConfigFile::load(&paths.config_file)
                .map_err(|error| anyhow::anyhow!("{error}"))
                .context("startup validation failed")?;
            let config = DaemonConfig::resolve(config_file.daemon.as_ref(), &args.overrides())
                .map_err(|error| anyhow::anyhow!("{error}"))
                .context("startup validation failed")?;
            mcpd_daemon::run_daemon(config, paths).await
        }
        Commands::Config { cmd } => match cmd {
            ConfigCommands::Validate => validate(&paths),
        },
    }
}

fn validate(paths: &DaemonPaths) -> Result<()> {
    let config = ConfigFile::load(&paths.config_file)
        .map_err(|error| anyhow::anyhow!("{error}"))
        .with_context(|| format!("invalid config: {}", paths.config_file.display()))?;
    let vars = RuntimeVars::load(&paths.runtime_file)
        .map_err(|error| anyhow::anyhow!("{error}"))
        .with_context(|| format!("invalid runtime-vars: {}", paths.runtime_file.display()))?;
    let specs = aggregate(&config, &vars).map_err(|error| anyhow::anyhow!("{error}"))?;

    println!(
        "configuration valid: {} server(s) from {}",
        specs.len(),
        paths.config_file.display()
    );
    for spec in &specs {
        println!(
            "  {} ({}::{}@{})",
            spec.name, spec.runtime, spec.package, spec.version
        );
    }
    Ok(())
}

/// Logging goes to stderr, or to the file named by flag/`MCPD_LOG_PATH`.
/// The returned guard must live as long as the process so buffered
/// lines flush on exit.
fn init_tracing(
    log_path: Option<PathBuf>,
    log_level: Option<String>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::EnvFilter;

    let level = log_level
        .or_else(|| std::env::var(LOG_LEVEL_ENV).ok())
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_new(&level)
        .with_context(|| format!("invalid log level '{level}'"))?;

    let log_path = log_path.or_else(|| std::env::var(LOG_PATH_ENV).ok().map(PathBuf::from));
    match log_path {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("log path has no file name: {}", path.display()))?;
            std::fs::create_dir_all(directory).with_context(|| {
                format!("failed to create log directory: {}", directory.display())
            })?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_writer(writer)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
            Ok(None)
        }
    }
}
