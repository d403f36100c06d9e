//! Shared test fixtures: mock MCP servers as shell scripts.

use mcpd_config::{Runtime, ServerSpec};
use mcpd_core::DaemonError;
use mcpd_mcp::client::ClientTimeouts;
use mcpd_mcp::{Client, Spawner};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) struct ScriptSpawner {
    script: PathBuf,
}

impl ScriptSpawner {
    pub(crate) fn new(script: &Path) -> Self {
        Self {
            script: script.to_path_buf(),
        }
    }
}

impl Spawner for ScriptSpawner {
    fn argv(&self, _spec: &ServerSpec) -> Result<Vec<String>, DaemonError> {
        Ok(vec![
            "sh".to_string(),
            self.script.to_string_lossy().into_owned(),
        ])
    }
}

/// Provider that launches the same mock script for every runtime.
pub(crate) struct FixedScriptSpawners {
    spawner: ScriptSpawner,
}

impl FixedScriptSpawners {
    pub(crate) fn new(script: &Path) -> Self {
        Self {
            spawner: ScriptSpawner::new(script),
        }
    }
}

impl crate::supervisor::SpawnerProvider for FixedScriptSpawners {
    fn spawner_for(&self, _runtime: Runtime) -> &dyn Spawner {
        &self.spawner
    }
}

pub(crate) fn test_spec(name: &str) -> ServerSpec {
    ServerSpec {
        name: name.into(),
        runtime: Runtime::Uvx,
        package: "mock".into(),
        version: "1.0".into(),
        allowed_tools: vec![],
        required_env: vec![],
        env: BTreeMap::new(),
        required_positional_args: vec![],
        required_value_args: vec![],
        required_bool_args: vec![],
        args: vec![],
        volumes: BTreeMap::new(),
        raw_volumes: vec![],
    }
}

pub(crate) fn test_timeouts() -> ClientTimeouts {
    ClientTimeouts {
        init: Duration::from_secs(5),
        health: Duration::from_secs(2),
        shutdown: Duration::from_secs(2),
    }
}

/// Mock MCP server answering the handshake, `tools/list` with two
/// tools, `tools/call`, `ping`, and `shutdown`.
pub(crate) fn write_mock_server(dir: &Path) -> PathBuf {
    let path = dir.join("mock-mcp.sh");
    std::fs::write(
        &path,
        r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([0-9]*\).*/\1/p')
  case "$line" in
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-03-26","capabilities":{"tools":{}},"serverInfo":{"name":"mock","version":"0.1.0"}}}\n' "$id"
      ;;
    *'"notifications/initialized"'*)
      ;;
    *'"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"get_current_time","description":"now","inputSchema":{"type":"object"}},{"name":"convert_time","inputSchema":{"type":"object"}}]}}\n' "$id"
      ;;
    *'"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id"
      ;;
    *'"ping"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      ;;
    *'"shutdown"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      ;;
  esac
done
"#,
    )
    .unwrap();
    path
}

/// Mock server whose `ping` never answers; everything else works.
pub(crate) fn write_deaf_ping_server(dir: &Path) -> PathBuf {
    let path = dir.join("deaf-ping.sh");
    std::fs::write(
        &path,
        r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([0-9]*\).*/\1/p')
  case "$line" in
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-03-26","capabilities":{}}}\n' "$id"
      ;;
    *'"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"slow_tool","inputSchema":{"type":"object"}}]}}\n' "$id"
      ;;
    *'"ping"'*)
      ;;
    *'"shutdown"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      ;;
  esac
done
"#,
    )
    .unwrap();
    path
}

/// Mock server whose `tools/call` takes about a second to answer.
pub(crate) fn write_slow_call_server(dir: &Path) -> PathBuf {
    let path = dir.join("slow-call.sh");
    std::fs::write(
        &path,
        r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([0-9]*\).*/\1/p')
  case "$line" in
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-03-26","capabilities":{}}}\n' "$id"
      ;;
    *'"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"slow_tool","inputSchema":{"type":"object"}}]}}\n' "$id"
      ;;
    *'"tools/call"'*)
      sleep 1
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"finally"}]}}\n' "$id"
      ;;
    *'"ping"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      ;;
    *'"shutdown"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      ;;
  esac
done
"#,
    )
    .unwrap();
    path
}

pub(crate) async fn spawn_mock_client(spawner: &dyn Spawner, spec: ServerSpec) -> Arc<Client> {
    let cancel = CancellationToken::new();
    Arc::new(
        Client::spawn(spawner, spec, test_timeouts(), &cancel)
            .await
            .expect("mock client spawns"),
    )
}
