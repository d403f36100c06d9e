use anyhow::{Context, Result};
use mcpd_config::{ConfigFile, DaemonConfig, RuntimeVars, ServerSpec, aggregate};
use mcpd_core::DaemonError;
use mcpd_mcp::client::ClientTimeouts;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::router::Router;
use crate::supervisor::{RuntimeSpawners, Supervisor};

/// On-disk inputs re-read on every reload.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub config_file: PathBuf,
    pub runtime_file: PathBuf,
}

impl DaemonPaths {
    fn load_specs(&self) -> Result<Vec<ServerSpec>, DaemonError> {
        let config = ConfigFile::load(&self.config_file)?;
        let vars = RuntimeVars::load(&self.runtime_file)?;
        aggregate(&config, &vars)
    }
}

/// Coordination for the hangup-triggered reload: a compare-and-swap
/// flag plus a single-slot queue. At most one reload runs at a time;
/// a duplicate hangup while one is in flight is dropped.
struct ReloadGate {
    in_progress: AtomicBool,
    tx: mpsc::Sender<()>,
}

impl ReloadGate {
    fn new() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                in_progress: AtomicBool::new(false),
                tx,
            },
            rx,
        )
    }

    /// Returns true when this call won the flag and enqueued a token.
    fn request(&self) -> bool {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        // The flag guards the slot, so the queue always has room.
        if self.tx.try_send(()).is_err() {
            self.in_progress.store(false, Ordering::Release);
            return false;
        }
        true
    }

    fn clear(&self) {
        self.in_progress.store(false, Ordering::Release);
    }
}

/// Run the daemon until interrupted.
///
/// Startup: aggregate specs (abort on validation error), start the
/// supervisor, publish the initial table, start health probing, open
/// the API listener, install signal handlers. Interrupt/terminate
/// drains and stops everything; hangup reloads the server set.
pub async fn run_daemon(config: DaemonConfig, paths: DaemonPaths) -> Result<()> {
    let specs = paths
        .load_specs()
        .map_err(|error| anyhow::anyhow!("{error}"))
        .context("startup validation failed")?;

    let cancel = CancellationToken::new();
    let timeouts = ClientTimeouts {
        init: config.timeouts.mcp_init,
        health: config.timeouts.mcp_health,
        shutdown: config.timeouts.mcp_shutdown,
    };
    let supervisor = Supervisor::new(
        Arc::new(RuntimeSpawners),
        timeouts,
        config.intervals.mcp_health,
        cancel.clone(),
    );

    let total = specs.len();
    let ready = supervisor.start_all(specs).await;
    tracing::info!(ready, total, "servers started");

    let state = ApiState {
        supervisor: supervisor.clone(),
        router: Router::new(supervisor.table()),
        shutdown: cancel.clone(),
    };
    let mut api_task = tokio::spawn(api::serve(
        config.addr,
        state,
        config.cors.clone(),
        cancel.clone(),
        config.timeouts.api_shutdown,
    ));

    let (reload_gate, mut reload_rx) = ReloadGate::new();
    let mut result = Ok(());

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut interrupt = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
        let mut terminate =
            signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;

        loop {
            tokio::select! {
                _ = interrupt.recv() => {
                    tracing::info!("interrupt received, shutting down");
                    break;
                }
                _ = terminate.recv() => {
                    tracing::info!("terminate received, shutting down");
                    break;
                }
                _ = hangup.recv() => {
                    if reload_gate.request() {
                        tracing::info!("hangup received, reload queued");
                    } else {
                        tracing::warn!("hangup received while a reload is in progress, dropping");
                    }
                }
                _ = reload_rx.recv() => {
                    match reload(&paths, &supervisor).await {
                        Ok(()) => reload_gate.clear(),
                        Err(error) => {
                            tracing::error!(error = %error, "reload failed, shutting down");
                            result = Err(error);
                            break;
                        }
                    }
                }
                joined = &mut api_task => {
                    result = flatten_api_result(joined).context("API server stopped unexpectedly");
                    break;
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
            }
            joined = &mut api_task => {
                result = flatten_api_result(joined).context("API server stopped unexpectedly");
            }
        }
        let _ = &mut reload_rx;
        let _ = &reload_gate;
    }

    cancel.cancel();
    if !api_task.is_finished() {
        if let Err(error) = flatten_api_result(api_task.await) {
            tracing::warn!(error = %error, "API server shutdown error");
        }
    }
    supervisor.stop_all().await;
    tracing::info!("daemon stopped");
    result
}

/// Re-read config and runtime-vars, aggregate, and apply the diff.
///
/// A validation failure rejects the reload as a whole and is fatal:
/// continuing against an inconsistent on-disk config is worse than
/// restarting. Per-server replacement failures keep the old instance
/// and are logged, not fatal.
async fn reload(paths: &DaemonPaths, supervisor: &Supervisor) -> Result<()> {
    tracing::info!("reload started");
    let specs = paths
        .load_specs()
        .map_err(|error| anyhow::anyhow!("{error}"))
        .context("reload validation failed")?;

    let summary = supervisor.reload(specs).await;
    for error in &summary.errors {
        tracing::warn!(server = %error.server, error = %error.error, "reload error");
    }
    tracing::info!(
        added = summary.added.len(),
        removed = summary.removed.len(),
        changed = summary.changed.len(),
        unchanged = summary.unchanged.len(),
        errors = summary.errors.len(),
        "reload finished"
    );
    Ok(())
}

fn flatten_api_result(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(error) => Err(anyhow::anyhow!("API task panicked: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_gate_admits_one_request_at_a_time() {
        let (gate, mut rx) = ReloadGate::new();

        assert!(gate.request());
        // Duplicate while in progress is dropped.
        assert!(!gate.request());
        assert!(!gate.request());

        // Consuming the token alone does not re-admit; the cycle must
        // clear the flag first.
        rx.try_recv().unwrap();
        assert!(!gate.request());

        gate.clear();
        assert!(gate.request());
        rx.try_recv().unwrap();
    }

    #[test]
    fn reload_gate_queue_never_exceeds_one_token() {
        let (gate, mut rx) = ReloadGate::new();
        assert!(gate.request());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn load_specs_surfaces_validation_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = dir.path().join("config.toml");
        let runtime_file = dir.path().join("secrets.toml");
        std::fs::write(
            &config_file,
            r#"
[[servers]]
name = "github"
package = "docker::github-mcp@0.6.0"
requiredEnv = ["GITHUB_TOKEN"]
"#,
        )
        .unwrap();

        let paths = DaemonPaths {
            config_file,
            runtime_file,
        };
        let err = paths.load_specs().unwrap_err();
        assert_eq!(err.kind, mcpd_core::ErrorKind::SpecUnsatisfied);
        assert!(err.to_string().contains("GITHUB_TOKEN"));
    }

    #[tokio::test]
    async fn load_specs_resolves_valid_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = dir.path().join("config.toml");
        let runtime_file = dir.path().join("secrets.toml");
        std::fs::write(
            &config_file,
            r#"
[[servers]]
name = "time"
package = "uvx::mcp-server-time@2025.1.1"
tools = ["get_current_time"]
"#,
        )
        .unwrap();
        std::fs::write(
            &runtime_file,
            r#"
[servers.time]
args = ["--local-timezone=UTC"]
"#,
        )
        .unwrap();

        let paths = DaemonPaths {
            config_file,
            runtime_file,
        };
        let specs = paths.load_specs().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "time");
        assert_eq!(specs[0].args, vec!["--local-timezone=UTC"]);
    }
}
