use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the capture session.
///
/// The full graph:
/// `Idle -> RequestingPermissions -> {Failed | Connecting} ->
/// {Failed | Recording} -> Stopping -> {Idle | Disconnected}`.
///
/// `Failed` is a transient reporting state: observers see it with the error
/// message, then the controller settles back to `Idle` with the message
/// retained. `Disconnected` is a resting state like `Idle` (it marks that
/// the remote side ended the session) and accepts a fresh `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    RequestingPermissions,
    Connecting,
    Recording,
    Stopping,
    Disconnected,
    Failed,
}

impl SessionState {
    /// Whether a new session may be started from this state.
    pub fn is_resting(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Disconnected)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, RequestingPermissions)
                | (Disconnected, RequestingPermissions)
                | (RequestingPermissions, Connecting)
                | (RequestingPermissions, Failed)
                | (RequestingPermissions, Stopping)
                | (Connecting, Recording)
                | (Connecting, Failed)
                | (Connecting, Stopping)
                | (Recording, Stopping)
                | (Stopping, Idle)
                | (Stopping, Disconnected)
                | (Failed, Idle)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::RequestingPermissions => "RequestingPermissions",
            SessionState::Connecting => "Connecting",
            SessionState::Recording => "Recording",
            SessionState::Stopping => "Stopping",
            SessionState::Disconnected => "Disconnected",
            SessionState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// What the status observer sees: the current state plus a human-readable
/// status line. The message outlives a transient `Failed` state so the
/// observer can still show what went wrong after settling to `Idle`.
///
/// `Failed` and the settling `Idle` are published back to back, and the
/// watch channel coalesces rapid updates, so an observer polling
/// `changed()` may never see `Failed` itself. The retained error message
/// is the durable record of the failure, not the transient state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub message: String,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            message: "Idle".to_string(),
        }
    }
}
