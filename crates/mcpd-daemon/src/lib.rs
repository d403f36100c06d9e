//! The mcpd daemon runtime: client supervision, health scheduling,
//! tool routing, the HTTP API, and the orchestrator that wires them
//! together under one shutdown/reload protocol.

pub mod api;
pub mod daemon;
pub mod docs;
pub mod health;
pub mod router;
pub mod supervisor;

#[cfg(test)]
mod testutil;

pub use daemon::{DaemonPaths, run_daemon};
pub use health::HealthBoard;
pub use router::{Router, RouterTable, ToolRef};
pub use supervisor::{RuntimeSpawners, ServerView, SpawnerProvider, Supervisor};
