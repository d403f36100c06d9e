//! MCP client plumbing: JSON-RPC 2.0 over child stdio, one frame per
//! line, with per-runtime process spawning and the live client handle
//! the supervisor manages.

pub mod client;
pub mod protocol;
pub mod spawn;
pub mod transport;

pub use client::{Client, ClientTimeouts};
pub use protocol::{Request, Response, RpcError, ToolDef};
pub use spawn::{SpawnedProcess, Spawner, spawn_server, spawner_for};
pub use transport::StdioTransport;
