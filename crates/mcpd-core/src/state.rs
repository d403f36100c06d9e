use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed MCP server process.
///
/// Transitions are monotonic except `Ready ⇄ Unhealthy`. `Stopped`
/// and `Failed` are terminal; a replacement instance always gets a
/// fresh handle rather than reviving an old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Starting,
    Initializing,
    Ready,
    Unhealthy,
    Stopping,
    Stopped,
    Failed,
}

impl ServerState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// States in which the client may serve tool calls.
    pub fn can_serve(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// States that appear in a published router table.
    pub fn is_publishable(&self) -> bool {
        matches!(self, Self::Ready | Self::Unhealthy)
    }

    /// Whether moving to `next` is a legal transition.
    ///
    /// Any state may fail; otherwise the order is
    /// Starting → Initializing → Ready ⇄ Unhealthy → Stopping → Stopped.
    pub fn may_transition(&self, next: ServerState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        matches!(
            (self, next),
            (Self::Starting, Self::Initializing)
                | (Self::Initializing, Self::Ready)
                | (Self::Ready, Self::Unhealthy)
                | (Self::Unhealthy, Self::Ready)
                | (Self::Ready, Self::Stopping)
                | (Self::Unhealthy, Self::Stopping)
                | (Self::Starting, Self::Stopping)
                | (Self::Initializing, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Unhealthy => "unhealthy",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ServerState;

    #[test]
    fn terminal_states_do_not_transition() {
        assert!(!ServerState::Stopped.may_transition(ServerState::Ready));
        assert!(!ServerState::Failed.may_transition(ServerState::Starting));
        assert!(!ServerState::Failed.may_transition(ServerState::Failed));
    }

    #[test]
    fn ready_and_unhealthy_oscillate() {
        assert!(ServerState::Ready.may_transition(ServerState::Unhealthy));
        assert!(ServerState::Unhealthy.may_transition(ServerState::Ready));
    }

    #[test]
    fn any_live_state_may_fail() {
        for state in [
            ServerState::Starting,
            ServerState::Initializing,
            ServerState::Ready,
            ServerState::Unhealthy,
            ServerState::Stopping,
        ] {
            assert!(state.may_transition(ServerState::Failed), "{state} -> failed");
        }
    }

    #[test]
    fn forward_only_through_startup() {
        assert!(ServerState::Starting.may_transition(ServerState::Initializing));
        assert!(!ServerState::Initializing.may_transition(ServerState::Starting));
        assert!(!ServerState::Ready.may_transition(ServerState::Initializing));
    }

    #[test]
    fn only_ready_serves_and_both_live_states_publish() {
        assert!(ServerState::Ready.can_serve());
        assert!(!ServerState::Unhealthy.can_serve());
        assert!(ServerState::Ready.is_publishable());
        assert!(ServerState::Unhealthy.is_publishable());
        assert!(!ServerState::Failed.is_publishable());
        assert!(!ServerState::Stopping.is_publishable());
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&ServerState::Unhealthy).unwrap();
        assert_eq!(json, "\"unhealthy\"");
    }
}
