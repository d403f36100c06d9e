//! Shared types and error taxonomy for the mcpd daemon.

pub mod error;
pub mod health;
pub mod state;

pub use error::{DaemonError, ErrorKind, Result};
pub use health::{HealthOutcome, HealthRecord};
pub use state::ServerState;
