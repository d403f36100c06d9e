use mcpd_core::{HealthOutcome, HealthRecord, ServerState};
use mcpd_mcp::Client;
use mcpd_mcp::client::health_outcome_for;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Consecutive probe failures that turn a client `Failed`.
pub const FAILURES_TO_FAIL: u32 = 3;

type Entry = Arc<Mutex<Option<HealthRecord>>>;

/// Shared health view: the scheduler writes, the API reads.
///
/// One lock per client entry; the outer map lock is only held long
/// enough to fetch the entry handle.
#[derive(Default)]
pub struct HealthBoard {
    entries: Mutex<HashMap<String, Entry>>,
}

impl HealthBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str) {
        self.entries
            .lock()
            .expect("health map poisoned")
            .entry(name.to_string())
            .or_default();
    }

    pub fn deregister(&self, name: &str) {
        self.entries.lock().expect("health map poisoned").remove(name);
    }

    pub fn record(&self, name: &str, record: HealthRecord) {
        let entry = self.entry(name);
        if let Some(entry) = entry {
            *entry.lock().expect("health entry poisoned") = Some(record);
        }
    }

    pub fn get(&self, name: &str) -> Option<HealthRecord> {
        self.entry(name)
            .and_then(|entry| entry.lock().expect("health entry poisoned").clone())
    }

    pub fn snapshot(&self) -> HashMap<String, Option<HealthRecord>> {
        let entries = self.entries.lock().expect("health map poisoned");
        entries
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    entry.lock().expect("health entry poisoned").clone(),
                )
            })
            .collect()
    }

    fn entry(&self, name: &str) -> Option<Entry> {
        self.entries
            .lock()
            .expect("health map poisoned")
            .get(name)
            .cloned()
    }
}

/// Run the probe loop for one client until cancelled or the client
/// goes terminal.
///
/// A single failure marks the client `Unhealthy`; three consecutive
/// failures mark it `Failed` and notify the supervisor (via
/// `failed_tx`) to republish the table without it. No auto-restart.
pub async fn probe_loop(
    client: Arc<Client>,
    board: Arc<HealthBoard>,
    interval: Duration,
    cancel: CancellationToken,
    failed_tx: mpsc::UnboundedSender<String>,
) {
    let mut consecutive_failures = 0u32;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so a fresh client is
    // not probed in the same instant it came up.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if client.state().is_terminal() {
            break;
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.ping(&cancel) => match result {
                Ok(()) => HealthOutcome::Ok,
                Err(error) => {
                    tracing::debug!(
                        server = %client.name(),
                        error = %error,
                        "health probe failed"
                    );
                    health_outcome_for(&error)
                }
            },
        };
        let latency = started.elapsed();

        if outcome.is_failure() {
            consecutive_failures += 1;
        } else {
            consecutive_failures = 0;
        }
        board.record(
            client.name(),
            HealthRecord::new(latency, outcome, consecutive_failures),
        );

        if outcome.is_failure() {
            if consecutive_failures >= FAILURES_TO_FAIL {
                tracing::warn!(
                    server = %client.name(),
                    failures = consecutive_failures,
                    "marking server failed after consecutive probe failures"
                );
                client.set_state(ServerState::Failed);
                let _ = failed_tx.send(client.name().to_string());
                break;
            }
            if client.set_state(ServerState::Unhealthy) {
                tracing::warn!(server = %client.name(), "server unhealthy");
            }
        } else if client.state() == ServerState::Unhealthy && client.set_state(ServerState::Ready)
        {
            tracing::info!(server = %client.name(), "server recovered");
        }
    }
}
