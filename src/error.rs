//! Error taxonomy for the capture/stream pipeline.
//!
//! Every variant maps to a state transition inside the session controller;
//! none of them escape to the status observer as an unhandled fault.

use crate::session::SessionState;

/// Errors that can end a capture session or reject a command.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The user or environment rejected a capture request.
    ///
    /// Covers both the microphone and the display request, and acquisition
    /// timeouts (the reason string says which).
    #[error("permission denied for {capture}: {reason}")]
    PermissionDenied {
        /// Which capture request was rejected ("microphone" or "display").
        capture: &'static str,
        /// Why the request was rejected.
        reason: String,
    },

    /// The shared display surface carries no audio track.
    ///
    /// The user must pick a tab or window that provides audio.
    #[error("selected display source has no audio track")]
    NoDisplayAudio,

    /// The connection to the remote service could not be established.
    #[error("failed to connect to {address}: {reason}")]
    ConnectFailure {
        /// Address the connection was attempted against.
        address: String,
        /// Why the connection failed.
        reason: String,
    },

    /// The transport reported an error after it was established.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The remote side closed the connection while a session was active.
    #[error("transport closed unexpectedly")]
    TransportClosedUnexpectedly,

    /// `start()` was issued while a session was already underway.
    #[error("start is only valid while idle (current state: {0})")]
    NotIdle(SessionState),

    /// The session was stopped before recording began.
    ///
    /// Returned to a pending `start()` when `stop()` lands during the
    /// permission or connection wait.
    #[error("session stopped before recording started")]
    Cancelled,

    /// A pipeline task failed in a way the taxonomy does not cover.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Creates a permission error for the microphone request.
    pub fn microphone_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            capture: "microphone",
            reason: reason.into(),
        }
    }

    /// Creates a permission error for the display request.
    pub fn display_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            capture: "display",
            reason: reason.into(),
        }
    }
}
