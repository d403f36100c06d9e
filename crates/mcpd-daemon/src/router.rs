use arc_swap::ArcSwap;
use mcpd_core::DaemonError;
use mcpd_mcp::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One `(server, tool)` routing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolRef {
    pub server: String,
    pub tool: String,
}

/// Immutable routing snapshot: name → live client, plus the flat
/// tool list drawn from effective tools.
///
/// Published by the supervisor through an atomic pointer swap; a
/// request holds one snapshot for its whole duration, so a reload
/// that replaces a client never interrupts an in-flight call.
pub struct RouterTable {
    clients: HashMap<String, Arc<Client>>,
    tools: Vec<ToolRef>,
}

impl RouterTable {
    pub fn empty() -> Self {
        Self {
            clients: HashMap::new(),
            tools: Vec::new(),
        }
    }

    /// Build a snapshot from publishable clients only; `Failed` and
    /// `Stopped` handles never enter a table.
    pub fn build(clients: impl IntoIterator<Item = Arc<Client>>) -> Self {
        let mut map: HashMap<String, Arc<Client>> = HashMap::new();
        for client in clients {
            if client.state().is_publishable() {
                map.insert(client.name().to_string(), client);
            }
        }

        let mut names: Vec<&String> = map.keys().collect();
        names.sort();
        let tools = names
            .iter()
            .flat_map(|name| {
                let client = &map[*name];
                client.effective_tools().iter().map(|tool| ToolRef {
                    server: client.name().to_string(),
                    tool: tool.clone(),
                })
            })
            .collect();

        Self { clients: map, tools }
    }

    pub fn get(&self, server: &str) -> Option<&Arc<Client>> {
        self.clients.get(server)
    }

    pub fn clients(&self) -> impl Iterator<Item = &Arc<Client>> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Read side of the routing table.
#[derive(Clone)]
pub struct Router {
    table: Arc<ArcSwap<RouterTable>>,
}

impl Router {
    pub fn new(table: Arc<ArcSwap<RouterTable>>) -> Self {
        Self { table }
    }

    /// Flat `(server, tool)` list across `Ready` clients.
    pub fn list_tools(&self) -> Vec<ToolRef> {
        let table = self.table.load();
        table
            .tools
            .iter()
            .filter(|entry| {
                table
                    .get(&entry.server)
                    .is_some_and(|client| client.state().can_serve())
            })
            .cloned()
            .collect()
    }

    /// Effective tools of one server, regardless of momentary state.
    pub fn tools_of(&self, server: &str) -> Result<Vec<ToolRef>, DaemonError> {
        let table = self.table.load();
        let client = table
            .get(server)
            .ok_or_else(|| DaemonError::not_found(format!("unknown server: {server}")))?;
        Ok(client
            .effective_tools()
            .iter()
            .map(|tool| ToolRef {
                server: server.to_string(),
                tool: tool.clone(),
            })
            .collect())
    }

    /// Forward a tool call to the owning client.
    ///
    /// The table snapshot acquired here lives until the call
    /// completes; a concurrent reload swaps the pointer without
    /// touching this call's client.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, DaemonError> {
        let table = self.table.load_full();
        let client = table
            .get(server)
            .ok_or_else(|| DaemonError::not_found(format!("unknown server: {server}")))?;

        let state = client.state();
        if !state.can_serve() {
            return Err(DaemonError::unavailable(format!(
                "server '{server}' is {state}, not ready"
            )));
        }
        if !client.has_effective_tool(tool) {
            return Err(DaemonError::not_found(format!(
                "server '{server}' does not expose tool '{tool}'"
            )));
        }

        client.call_tool(tool, arguments, cancel).await
    }
}
