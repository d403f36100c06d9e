use serde::{Deserialize, Serialize};

/// Structured error category surfaced to API clients as the `kind`
/// field of an error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Schema or validation failure in declarative config or runtime-vars.
    ConfigInvalid,
    /// Required env/arg missing for a specific server.
    SpecUnsatisfied,
    /// Runtime binary missing, exec error, or init handshake timeout.
    SpawnFailed,
    /// Client not `Ready` at call time.
    Unavailable,
    /// Unknown server or tool, or tool not in the effective set.
    NotFound,
    /// Call or health deadline exceeded.
    Timeout,
    /// Stdio pipe closed or malformed frame.
    Transport,
    /// MCP-level error returned by the child.
    ProtocolError,
    /// Request cancelled by client disconnect or shutdown.
    Cancelled,
    /// Anything unclassified.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigInvalid => "config_invalid",
            Self::SpecUnsatisfied => "spec_unsatisfied",
            Self::SpawnFailed => "spawn_failed",
            Self::Unavailable => "unavailable",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::ProtocolError => "protocol_error",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Daemon error: a message plus its taxonomy kind and optional
/// structured details for the HTTP error body.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct DaemonError {
    pub kind: ErrorKind,
    message: String,
    details: Option<serde_json::Value>,
}

pub type Result<T> = std::result::Result<T, DaemonError>;

impl DaemonError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        self.details.as_ref()
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    pub fn spec_unsatisfied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SpecUnsatisfied, message)
    }

    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SpawnFailed, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(ErrorKind::Internal, format!("JSON encoding failed: {error}"))
    }
}

impl From<std::io::Error> for DaemonError {
    fn from(error: std::io::Error) -> Self {
        Self::new(ErrorKind::Transport, format!("I/O failed: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_message_only() {
        let err = DaemonError::not_found("unknown server: github");
        assert_eq!(err.to_string(), "unknown server: github");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::SpecUnsatisfied).unwrap();
        assert_eq!(json, "\"spec_unsatisfied\"");
        let json = serde_json::to_string(&ErrorKind::ProtocolError).unwrap();
        assert_eq!(json, "\"protocol_error\"");
    }

    #[test]
    fn kind_round_trips() {
        for kind in [
            ErrorKind::ConfigInvalid,
            ErrorKind::SpecUnsatisfied,
            ErrorKind::SpawnFailed,
            ErrorKind::Unavailable,
            ErrorKind::NotFound,
            ErrorKind::Timeout,
            ErrorKind::Transport,
            ErrorKind::ProtocolError,
            ErrorKind::Cancelled,
            ErrorKind::Internal,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            let back: ErrorKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn details_are_attached() {
        let err = DaemonError::spec_unsatisfied("server 'github' missing GITHUB_TOKEN")
            .with_details(serde_json::json!({"server": "github", "variable": "GITHUB_TOKEN"}));
        assert_eq!(err.details().unwrap()["variable"], "GITHUB_TOKEN");
    }
}
