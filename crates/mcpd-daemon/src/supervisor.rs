use arc_swap::ArcSwap;
use mcpd_config::{Runtime, ServerSpec};
use mcpd_core::{DaemonError, HealthRecord, ServerState};
use mcpd_mcp::client::ClientTimeouts;
use mcpd_mcp::{Client, Spawner};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::health::{HealthBoard, probe_loop};
use crate::router::RouterTable;

/// Chooses the spawner for a runtime. Production uses the per-runtime
/// spawners from `mcpd-mcp`; tests substitute script-backed ones.
pub trait SpawnerProvider: Send + Sync {
    fn spawner_for(&self, runtime: Runtime) -> &dyn Spawner;
}

pub struct RuntimeSpawners;

impl SpawnerProvider for RuntimeSpawners {
    fn spawner_for(&self, runtime: Runtime) -> &dyn Spawner {
        mcpd_mcp::spawner_for(runtime)
    }
}

/// Queryable snapshot of one managed server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerView {
    pub name: String,
    pub state: ServerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadError {
    pub server: String,
    pub error: String,
}

/// Result of one reload cycle.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
    pub errors: Vec<ReloadError>,
}

impl ReloadSummary {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

enum ClientRecord {
    Live {
        client: Arc<Client>,
        probe_cancel: CancellationToken,
    },
    Failed {
        spec: ServerSpec,
        error: String,
    },
}

impl ClientRecord {
    fn spec(&self) -> &ServerSpec {
        match self {
            Self::Live { client, .. } => client.spec(),
            Self::Failed { spec, .. } => spec,
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Self::Live { client, .. } => !client.state().is_terminal(),
            Self::Failed { .. } => false,
        }
    }

    fn view(&self, health: &HealthBoard) -> ServerView {
        match self {
            Self::Live { client, .. } => ServerView {
                name: client.name().to_string(),
                state: client.state(),
                pid: client.pid(),
                tools: client.effective_tools().to_vec(),
                error: None,
                health: health.get(client.name()),
            },
            Self::Failed { spec, error } => ServerView {
                name: spec.name.clone(),
                state: ServerState::Failed,
                pid: None,
                tools: Vec::new(),
                error: Some(error.clone()),
                health: None,
            },
        }
    }
}

/// Owns every managed client: spawns them, runs their health probes,
/// applies reload diffs, and publishes the router table.
pub struct Supervisor {
    spawners: Arc<dyn SpawnerProvider>,
    timeouts: ClientTimeouts,
    health_interval: Duration,
    records: tokio::sync::Mutex<BTreeMap<String, ClientRecord>>,
    table: Arc<ArcSwap<RouterTable>>,
    health: Arc<HealthBoard>,
    failed_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        spawners: Arc<dyn SpawnerProvider>,
        timeouts: ClientTimeouts,
        health_interval: Duration,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (failed_tx, failed_rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(Self {
            spawners,
            timeouts,
            health_interval,
            records: tokio::sync::Mutex::new(BTreeMap::new()),
            table: Arc::new(ArcSwap::from_pointee(RouterTable::empty())),
            health: Arc::new(HealthBoard::new()),
            failed_tx,
            cancel: cancel.clone(),
        });

        tokio::spawn(republish_on_failure(
            Arc::downgrade(&supervisor),
            failed_rx,
            cancel,
        ));
        supervisor
    }

    /// Shared routing table handle for the router.
    pub fn table(&self) -> Arc<ArcSwap<RouterTable>> {
        self.table.clone()
    }

    pub fn health(&self) -> Arc<HealthBoard> {
        self.health.clone()
    }

    /// Spawn every spec in parallel. Partial failure never aborts the
    /// rest; failed servers are recorded and stay queryable. Returns
    /// the number of servers that reached `Ready`.
    pub async fn start_all(&self, specs: Vec<ServerSpec>) -> usize {
        let mut records = self.records.lock().await;

        let mut launches = JoinSet::new();
        for spec in specs {
            let spawners = self.spawners.clone();
            let timeouts = self.timeouts;
            let cancel = self.cancel.clone();
            launches.spawn(async move {
                let spawner = spawners.spawner_for(spec.runtime);
                let result = Client::spawn(spawner, spec.clone(), timeouts, &cancel).await;
                (spec, result)
            });
        }

        let mut ready = 0usize;
        while let Some(joined) = launches.join_next().await {
            let Ok((spec, result)) = joined else {
                continue;
            };
            let name = spec.name.clone();
            let record = self.record_launch(spec, result, &mut ready);
            records.insert(name, record);
        }

        self.publish_locked(&records);
        ready
    }

    fn record_launch(
        &self,
        spec: ServerSpec,
        result: Result<Client, DaemonError>,
        ready: &mut usize,
    ) -> ClientRecord {
        match result {
            Ok(client) => {
                *ready += 1;
                self.watch(Arc::new(client))
            }
            Err(error) => {
                tracing::error!(server = %spec.name, error = %error, "server failed to start");
                ClientRecord::Failed {
                    spec,
                    error: error.to_string(),
                }
            }
        }
    }

    /// Register health probing for a live client.
    fn watch(&self, client: Arc<Client>) -> ClientRecord {
        self.health.register(client.name());
        let probe_cancel = self.cancel.child_token();
        tokio::spawn(probe_loop(
            client.clone(),
            self.health.clone(),
            self.health_interval,
            probe_cancel.clone(),
            self.failed_tx.clone(),
        ));
        ClientRecord::Live {
            client,
            probe_cancel,
        }
    }

    /// Stop one server and drop it from the set.
    pub async fn stop(&self, name: &str) -> Result<(), DaemonError> {
        let mut records = self.records.lock().await;
        let record = records
            .remove(name)
            .ok_or_else(|| DaemonError::not_found(format!("unknown server: {name}")))?;
        self.retire(record).await;
        self.publish_locked(&records);
        Ok(())
    }

    /// Stop every server; used during daemon shutdown.
    pub async fn stop_all(&self) {
        let mut records = self.records.lock().await;
        let drained: Vec<ClientRecord> = std::mem::take(&mut *records).into_values().collect();

        let mut shutdowns = JoinSet::new();
        for record in drained {
            match record {
                ClientRecord::Live {
                    client,
                    probe_cancel,
                } => {
                    probe_cancel.cancel();
                    self.health.deregister(client.name());
                    shutdowns.spawn(async move {
                        let _ = client.shutdown().await;
                    });
                }
                ClientRecord::Failed { spec, .. } => {
                    self.health.deregister(&spec.name);
                }
            }
        }
        while shutdowns.join_next().await.is_some() {}

        self.publish_locked(&records);
    }

    async fn retire(&self, record: ClientRecord) {
        match record {
            ClientRecord::Live {
                client,
                probe_cancel,
            } => {
                probe_cancel.cancel();
                self.health.deregister(client.name());
                if let Err(error) = client.shutdown().await {
                    tracing::warn!(server = %client.name(), error = %error, "shutdown failed");
                }
            }
            ClientRecord::Failed { spec, .. } => {
                self.health.deregister(&spec.name);
            }
        }
    }

    /// Apply a new spec set: stop removed servers, start added ones,
    /// replace changed ones (new instance must reach `Ready` before
    /// the old is retired), leave unchanged ones untouched. The table
    /// is published exactly once, after the whole diff is applied.
    pub async fn reload(&self, new_specs: Vec<ServerSpec>) -> ReloadSummary {
        let mut records = self.records.lock().await;
        let mut summary = ReloadSummary::default();

        let new_names: HashSet<&str> = new_specs.iter().map(|spec| spec.name.as_str()).collect();
        let removed: Vec<String> = records
            .keys()
            .filter(|name| !new_names.contains(name.as_str()))
            .cloned()
            .collect();
        for name in removed {
            if let Some(record) = records.remove(&name) {
                tracing::info!(server = %name, "stopping removed server");
                self.retire(record).await;
            }
            summary.removed.push(name);
        }

        for spec in new_specs {
            let name = spec.name.clone();
            match records.get(&name) {
                None => {
                    tracing::info!(server = %name, "starting added server");
                    match self.launch(spec.clone()).await {
                        Ok(record) => {
                            records.insert(name.clone(), record);
                            summary.added.push(name);
                        }
                        Err(error) => {
                            summary.errors.push(ReloadError {
                                server: name.clone(),
                                error: error.to_string(),
                            });
                            // Keep the failure queryable, mirroring
                            // startup behavior.
                            records.insert(
                                name.clone(),
                                ClientRecord::Failed {
                                    spec,
                                    error: error.to_string(),
                                },
                            );
                            summary.added.push(name);
                        }
                    }
                }
                Some(record) if record.spec().spec_hash() == spec.spec_hash()
                    && record.is_live() =>
                {
                    summary.unchanged.push(name);
                }
                Some(record) => {
                    // Changed spec, or a dead record being revived:
                    // the replacement must reach Ready before the old
                    // instance is retired.
                    let was_live = record.is_live();
                    match self.launch(spec).await {
                        Ok(new_record) => {
                            tracing::info!(server = %name, "replacing server");
                            if let Some(old) = records.remove(&name) {
                                self.retire_replaced(old).await;
                            }
                            records.insert(name.clone(), new_record);
                            summary.changed.push(name);
                        }
                        Err(error) => {
                            tracing::error!(
                                server = %name,
                                error = %error,
                                "replacement failed to initialize; keeping current instance"
                            );
                            if was_live {
                                summary.unchanged.push(name.clone());
                            }
                            summary.errors.push(ReloadError {
                                server: name,
                                error: error.to_string(),
                            });
                        }
                    }
                }
            }
        }

        self.publish_locked(&records);
        summary
    }

    /// Retire a replaced record without touching the health board
    /// registration its replacement just made.
    async fn retire_replaced(&self, record: ClientRecord) {
        if let ClientRecord::Live {
            client,
            probe_cancel,
        } = record
        {
            probe_cancel.cancel();
            if let Err(error) = client.shutdown().await {
                tracing::warn!(server = %client.name(), error = %error, "shutdown failed");
            }
        }
    }

    async fn launch(&self, spec: ServerSpec) -> Result<ClientRecord, DaemonError> {
        let spawner = self.spawners.spawner_for(spec.runtime);
        let client = Client::spawn(spawner, spec, self.timeouts, &self.cancel).await?;
        Ok(self.watch(Arc::new(client)))
    }

    /// Rebuild and atomically publish the routing table from the
    /// current record set.
    fn publish_locked(&self, records: &BTreeMap<String, ClientRecord>) {
        let clients = records.values().filter_map(|record| match record {
            ClientRecord::Live { client, .. } => Some(client.clone()),
            ClientRecord::Failed { .. } => None,
        });
        let table = RouterTable::build(clients);
        tracing::debug!(servers = table.len(), "publishing router table");
        self.table.store(Arc::new(table));
    }

    /// Republish from the live record set (e.g. after a health
    /// transition).
    pub async fn republish(&self) {
        let records = self.records.lock().await;
        self.publish_locked(&records);
    }

    /// Snapshot of every managed server, failed ones included.
    pub async fn views(&self) -> Vec<ServerView> {
        let records = self.records.lock().await;
        records
            .values()
            .map(|record| record.view(&self.health))
            .collect()
    }
}

/// Waits for health-failure notifications and republishes the table
/// so failed clients drop out of routing.
async fn republish_on_failure(
    supervisor: Weak<Supervisor>,
    mut failed_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let name = tokio::select! {
            _ = cancel.cancelled() => break,
            name = failed_rx.recv() => match name {
                Some(name) => name,
                None => break,
            },
        };
        let Some(supervisor) = supervisor.upgrade() else {
            break;
        };
        tracing::info!(server = %name, "removing failed server from routing");
        supervisor.republish().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_spec, test_timeouts, write_deaf_ping_server, write_mock_server};
    use std::path::PathBuf;

    /// Spawner provider that runs the script named by `spec.package`.
    struct SpecScriptSpawners;

    struct SpecScriptSpawner;

    static SPEC_SCRIPT_SPAWNER: SpecScriptSpawner = SpecScriptSpawner;

    impl Spawner for SpecScriptSpawner {
        fn argv(&self, spec: &ServerSpec) -> Result<Vec<String>, DaemonError> {
            Ok(vec!["sh".to_string(), spec.package.clone()])
        }
    }

    impl SpawnerProvider for SpecScriptSpawners {
        fn spawner_for(&self, _runtime: Runtime) -> &dyn Spawner {
            &SPEC_SCRIPT_SPAWNER
        }
    }

    fn script_spec(name: &str, script: &PathBuf) -> ServerSpec {
        let mut spec = test_spec(name);
        spec.package = script.to_string_lossy().into_owned();
        spec
    }

    fn supervisor_with(health_interval: Duration) -> (Arc<Supervisor>, CancellationToken) {
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(
            Arc::new(SpecScriptSpawners),
            test_timeouts(),
            health_interval,
            cancel.clone(),
        );
        (supervisor, cancel)
    }

    fn supervisor() -> (Arc<Supervisor>, CancellationToken) {
        supervisor_with(Duration::from_secs(60))
    }

    async fn state_of(supervisor: &Supervisor, name: &str) -> Option<ServerState> {
        supervisor
            .views()
            .await
            .into_iter()
            .find(|view| view.name == name)
            .map(|view| view.state)
    }

    async fn pid_of(supervisor: &Supervisor, name: &str) -> Option<u32> {
        supervisor
            .views()
            .await
            .into_iter()
            .find(|view| view.name == name)
            .and_then(|view| view.pid)
    }

    #[tokio::test]
    async fn start_all_tolerates_partial_failure() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_mock_server(dir.path());
        let dead = dir.path().join("dead.sh");
        std::fs::write(&dead, "#!/bin/sh\nexit 1\n").unwrap();

        let (supervisor, cancel) = supervisor();
        let ready = supervisor
            .start_all(vec![
                script_spec("good", &good),
                script_spec("dead", &dead),
            ])
            .await;

        assert_eq!(ready, 1);
        assert_eq!(
            state_of(&supervisor, "good").await,
            Some(ServerState::Ready)
        );
        assert_eq!(
            state_of(&supervisor, "dead").await,
            Some(ServerState::Failed)
        );

        // Only the healthy server enters the published table.
        let table = supervisor.table();
        let table = table.load();
        assert!(table.get("good").is_some());
        assert!(table.get("dead").is_none());

        let failed_view = supervisor
            .views()
            .await
            .into_iter()
            .find(|view| view.name == "dead")
            .unwrap();
        assert!(failed_view.error.is_some());

        supervisor.stop_all().await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn reload_adds_without_restarting_existing() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_mock_server(dir.path());

        let (supervisor, cancel) = supervisor();
        supervisor.start_all(vec![script_spec("a", &script)]).await;
        let pid_before = pid_of(&supervisor, "a").await.unwrap();

        let summary = supervisor
            .reload(vec![script_spec("a", &script), script_spec("b", &script)])
            .await;

        assert!(summary.is_clean());
        assert_eq!(summary.added, vec!["b"]);
        assert_eq!(summary.unchanged, vec!["a"]);
        assert_eq!(pid_of(&supervisor, "a").await.unwrap(), pid_before);
        assert_eq!(state_of(&supervisor, "b").await, Some(ServerState::Ready));

        supervisor.stop_all().await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn reload_removes_and_unroutes() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_mock_server(dir.path());

        let (supervisor, cancel) = supervisor();
        supervisor
            .start_all(vec![script_spec("a", &script), script_spec("b", &script)])
            .await;

        let summary = supervisor.reload(vec![script_spec("a", &script)]).await;
        assert_eq!(summary.removed, vec!["b"]);
        assert!(state_of(&supervisor, "b").await.is_none());
        assert!(supervisor.table().load().get("b").is_none());

        supervisor.stop_all().await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn reload_identical_specs_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_mock_server(dir.path());

        let (supervisor, cancel) = supervisor();
        supervisor.start_all(vec![script_spec("a", &script)]).await;
        let pid_before = pid_of(&supervisor, "a").await.unwrap();

        let summary = supervisor.reload(vec![script_spec("a", &script)]).await;
        assert!(summary.is_clean());
        assert_eq!(summary.unchanged, vec!["a"]);
        assert!(summary.added.is_empty());
        assert!(summary.changed.is_empty());
        assert_eq!(pid_of(&supervisor, "a").await.unwrap(), pid_before);

        supervisor.stop_all().await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn reload_replaces_changed_spec() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_mock_server(dir.path());

        let (supervisor, cancel) = supervisor();
        supervisor.start_all(vec![script_spec("a", &script)]).await;
        let pid_before = pid_of(&supervisor, "a").await.unwrap();

        let mut changed = script_spec("a", &script);
        changed.args = vec!["--flag".into()];
        let summary = supervisor.reload(vec![changed]).await;

        assert!(summary.is_clean());
        assert_eq!(summary.changed, vec!["a"]);
        let pid_after = pid_of(&supervisor, "a").await.unwrap();
        assert_ne!(pid_before, pid_after);
        assert_eq!(state_of(&supervisor, "a").await, Some(ServerState::Ready));

        supervisor.stop_all().await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn failed_replacement_keeps_old_instance() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_mock_server(dir.path());
        let dead = dir.path().join("dead.sh");
        std::fs::write(&dead, "#!/bin/sh\nexit 1\n").unwrap();

        let (supervisor, cancel) = supervisor();
        supervisor.start_all(vec![script_spec("a", &script)]).await;
        let pid_before = pid_of(&supervisor, "a").await.unwrap();

        let summary = supervisor.reload(vec![script_spec("a", &dead)]).await;
        assert!(!summary.is_clean());
        assert_eq!(summary.errors[0].server, "a");

        // The old instance keeps serving.
        assert_eq!(state_of(&supervisor, "a").await, Some(ServerState::Ready));
        assert_eq!(pid_of(&supervisor, "a").await.unwrap(), pid_before);
        assert!(supervisor.table().load().get("a").is_some());

        supervisor.stop_all().await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn reload_revives_failed_server() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_mock_server(dir.path());
        let dead = dir.path().join("dead.sh");
        std::fs::write(&dead, "#!/bin/sh\nexit 1\n").unwrap();

        let (supervisor, cancel) = supervisor();
        supervisor.start_all(vec![script_spec("a", &dead)]).await;
        assert_eq!(state_of(&supervisor, "a").await, Some(ServerState::Failed));

        let summary = supervisor.reload(vec![script_spec("a", &script)]).await;
        assert!(summary.is_clean());
        assert_eq!(state_of(&supervisor, "a").await, Some(ServerState::Ready));
        assert!(supervisor.table().load().get("a").is_some());

        supervisor.stop_all().await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn stop_removes_from_views_and_table() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_mock_server(dir.path());

        let (supervisor, cancel) = supervisor();
        supervisor.start_all(vec![script_spec("a", &script)]).await;
        supervisor.stop("a").await.unwrap();

        assert!(state_of(&supervisor, "a").await.is_none());
        assert!(supervisor.table().load().is_empty());

        let err = supervisor.stop("a").await.unwrap_err();
        assert_eq!(err.kind, mcpd_core::ErrorKind::NotFound);
        cancel.cancel();
    }

    #[tokio::test]
    async fn removed_server_finishes_in_flight_call_before_retiring() {
        use crate::testutil::write_slow_call_server;
        use serde_json::json;

        let dir = tempfile::tempdir().unwrap();
        let slow = write_slow_call_server(dir.path());

        let (supervisor, cancel) = supervisor();
        supervisor.start_all(vec![script_spec("slow", &slow)]).await;

        // Route the way the router does: grab the client out of the
        // current table snapshot and call on it.
        let table = supervisor.table();
        let client = table.load().get("slow").unwrap().clone();
        let call = tokio::spawn({
            let client = client.clone();
            async move {
                let token = CancellationToken::new();
                client.call_tool("slow_tool", json!({}), &token).await
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let summary = supervisor.reload(vec![]).await;
        assert_eq!(summary.removed, vec!["slow"]);

        // The call that was in flight when the reload removed the
        // server still completes against the old instance.
        let result = call.await.unwrap().unwrap();
        assert_eq!(result["content"][0]["text"], "finally");
        assert_eq!(client.state(), ServerState::Stopped);
        assert!(supervisor.views().await.is_empty());

        cancel.cancel();
    }

    #[tokio::test]
    async fn three_probe_failures_fail_the_client_and_unroute_it() {
        let dir = tempfile::tempdir().unwrap();
        let deaf = write_deaf_ping_server(dir.path());

        let cancel = CancellationToken::new();
        let timeouts = ClientTimeouts {
            health: Duration::from_millis(100),
            ..test_timeouts()
        };
        let supervisor = Supervisor::new(
            Arc::new(SpecScriptSpawners),
            timeouts,
            Duration::from_millis(50),
            cancel.clone(),
        );
        supervisor.start_all(vec![script_spec("deaf", &deaf)]).await;
        assert_eq!(
            state_of(&supervisor, "deaf").await,
            Some(ServerState::Ready)
        );

        // Three consecutive ping timeouts take roughly half a second.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if state_of(&supervisor, "deaf").await == Some(ServerState::Failed) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "never failed");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // Give the republish task a beat, then the table must be rid
        // of the failed client.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if supervisor.table().load().get("deaf").is_none() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "never unrouted");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let health = supervisor.health().get("deaf").unwrap();
        assert!(health.outcome.is_failure());
        assert!(health.consecutive_failures >= 3);

        supervisor.stop_all().await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn probe_failure_then_recovery_restores_ready() {
        // Drive probe_loop directly against a healthy server with a
        // manually injected unhealthy state.
        let dir = tempfile::tempdir().unwrap();
        let script = write_mock_server(dir.path());
        let (supervisor, cancel) = supervisor_with(Duration::from_millis(50));
        supervisor.start_all(vec![script_spec("a", &script)]).await;

        let table = supervisor.table();
        let client = table.load().get("a").unwrap().clone();
        client.set_state(ServerState::Unhealthy);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if client.state() == ServerState::Ready {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "never recovered");
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        supervisor.stop_all().await;
        cancel.cancel();
    }
}
