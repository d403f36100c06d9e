use mcpd_config::ServerSpec;
use mcpd_core::{DaemonError, ErrorKind, ServerState};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use crate::protocol::{self, InitializeResult, ToolsListResult};
use crate::spawn::{Spawner, spawn_server};
use crate::transport::StdioTransport;

/// Deadline for forwarded tool calls. Not operator-tunable; MCP
/// tools that legitimately run longer should stream progress through
/// their own protocol features.
pub const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period between SIGTERM and SIGKILL during escalation.
const TERM_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct ClientTimeouts {
    pub init: Duration,
    pub health: Duration,
    pub shutdown: Duration,
}

/// A live handle to one running MCP server process.
///
/// Created by the supervisor; a replacement on reload always builds a
/// new `Client` rather than mutating an old one.
#[derive(Debug)]
pub struct Client {
    spec: ServerSpec,
    pid: Option<u32>,
    state: Mutex<ServerState>,
    transport: StdioTransport,
    child: tokio::sync::Mutex<Child>,
    advertised_tools: Vec<protocol::ToolDef>,
    effective_tools: Vec<String>,
    timeouts: ClientTimeouts,
}

impl Client {
    /// Spawn the child, run the MCP init handshake, and learn the
    /// tool set. Any failure before `Ready` tears the child down and
    /// surfaces as `SpawnFailed`.
    pub async fn spawn(
        spawner: &dyn Spawner,
        spec: ServerSpec,
        timeouts: ClientTimeouts,
        cancel: &CancellationToken,
    ) -> Result<Self, DaemonError> {
        let spawned = spawn_server(spawner, &spec).await?;
        let transport = StdioTransport::attach(
            &spec.name,
            spawned.stdin,
            spawned.stdout,
            spawned.stderr,
        );

        let mut child = spawned.child;
        match Self::handshake(&spec, &transport, timeouts.init, cancel).await {
            Ok((advertised_tools, effective_tools)) => {
                tracing::info!(
                    server = %spec.name,
                    pid = spawned.pid,
                    tools = effective_tools.len(),
                    "server ready"
                );
                Ok(Self {
                    pid: spawned.pid,
                    state: Mutex::new(ServerState::Ready),
                    transport,
                    child: tokio::sync::Mutex::new(child),
                    advertised_tools,
                    effective_tools,
                    timeouts,
                    spec,
                })
            }
            Err(error) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(DaemonError::spawn_failed(format!(
                    "server '{}' failed to initialize: {error}",
                    spec.name
                )))
            }
        }
    }

    async fn handshake(
        spec: &ServerSpec,
        transport: &StdioTransport,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(Vec<protocol::ToolDef>, Vec<String>), DaemonError> {
        let init = transport
            .request(
                "initialize",
                Some(protocol::initialize_params()),
                deadline,
                cancel,
            )
            .await?;
        let init: InitializeResult = serde_json::from_value(init).map_err(|error| {
            DaemonError::protocol(format!(
                "'{}' returned a malformed initialize result: {error}",
                spec.name
            ))
        })?;
        tracing::debug!(
            server = %spec.name,
            protocol = %init.protocol_version,
            "initialize handshake complete"
        );
        transport.notify("notifications/initialized", None).await?;

        let mut advertised = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = transport
                .request(
                    "tools/list",
                    Some(protocol::list_tools_params(cursor.as_deref())),
                    deadline,
                    cancel,
                )
                .await?;
            let page: ToolsListResult = serde_json::from_value(page).map_err(|error| {
                DaemonError::protocol(format!(
                    "'{}' returned a malformed tools/list result: {error}",
                    spec.name
                ))
            })?;
            advertised.extend(page.tools);
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        let effective = effective_tools(spec, &advertised);
        Ok((advertised, effective))
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Apply a transition if the state machine allows it.
    pub fn set_state(&self, next: ServerState) -> bool {
        let mut state = self.state.lock().expect("state lock poisoned");
        if !state.may_transition(next) {
            tracing::warn!(
                server = %self.spec.name,
                from = %*state,
                to = %next,
                "ignoring illegal state transition"
            );
            return false;
        }
        *state = next;
        true
    }

    pub fn advertised_tools(&self) -> &[protocol::ToolDef] {
        &self.advertised_tools
    }

    /// Advertised tools filtered by the configured allow-list.
    pub fn effective_tools(&self) -> &[String] {
        &self.effective_tools
    }

    pub fn has_effective_tool(&self, tool: &str) -> bool {
        self.effective_tools.iter().any(|name| name == tool)
    }

    /// Forward a `tools/call` over this client's transport.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, DaemonError> {
        self.transport
            .request(
                "tools/call",
                Some(protocol::call_tool_params(tool, arguments)),
                TOOL_CALL_TIMEOUT,
                cancel,
            )
            .await
    }

    /// MCP ping with the health deadline.
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<(), DaemonError> {
        self.transport
            .request("ping", None, self.timeouts.health, cancel)
            .await
            .map(|_| ())
    }

    /// Graceful shutdown with bounded escalation: drain in-flight
    /// requests, send the shutdown request and close stdin, then
    /// SIGTERM to the process group, then kill.
    pub async fn shutdown(&self) -> Result<(), DaemonError> {
        // A Failed client is already terminal; still reap the
        // process, but leave the recorded state alone.
        let was_terminal = self.state().is_terminal();
        if !was_terminal {
            self.set_state(ServerState::Stopping);
        }

        // A call that was routed to this client before it left the
        // table gets to finish before the process goes away.
        self.transport.drain_pending(self.timeouts.shutdown).await;

        if !self.transport.is_closed() {
            let cancel = CancellationToken::new();
            let deadline = self.timeouts.shutdown.min(Duration::from_secs(2));
            if let Err(error) = self
                .transport
                .request("shutdown", None, deadline, &cancel)
                .await
            {
                tracing::debug!(
                    server = %self.spec.name,
                    error = %error,
                    "shutdown request not acknowledged"
                );
            }
        }
        self.transport.close_stdin();

        let mut child = self.child.lock().await;
        let exited = tokio::time::timeout(self.timeouts.shutdown, child.wait())
            .await
            .is_ok();

        if !exited {
            self.signal_group(libc::SIGTERM);
            let termed = tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok();
            if !termed {
                tracing::warn!(server = %self.spec.name, "escalating to SIGKILL");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }

        if !was_terminal {
            self.set_state(ServerState::Stopped);
        }
        tracing::info!(server = %self.spec.name, "server stopped");
        Ok(())
    }

    fn signal_group(&self, signal: i32) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            // The child called setsid, so its pid is the group id.
            // SAFETY: kill with a negative pgid has no preconditions.
            unsafe {
                libc::kill(-(pid as i32), signal);
            }
        }
        #[cfg(not(unix))]
        let _ = signal;
    }
}

/// Intersect advertised tools with the allow-list; an empty
/// allow-list exposes everything advertised. Allowed-but-not-
/// advertised tools warn and are skipped rather than failing the
/// server.
fn effective_tools(spec: &ServerSpec, advertised: &[protocol::ToolDef]) -> Vec<String> {
    if spec.allowed_tools.is_empty() {
        return advertised.iter().map(|tool| tool.name.clone()).collect();
    }

    let mut effective = Vec::new();
    for allowed in &spec.allowed_tools {
        if advertised.iter().any(|tool| &tool.name == allowed) {
            effective.push(allowed.clone());
        } else {
            tracing::warn!(
                server = %spec.name,
                tool = %allowed,
                "allowed tool is not advertised by the server"
            );
        }
    }
    effective
}

/// Classify a probe error for the health record.
pub fn health_outcome_for(error: &DaemonError) -> mcpd_core::HealthOutcome {
    match error.kind {
        ErrorKind::Timeout => mcpd_core::HealthOutcome::Timeout,
        ErrorKind::Transport | ErrorKind::Cancelled => mcpd_core::HealthOutcome::Transport,
        _ => mcpd_core::HealthOutcome::Protocol,
    }
}
