//! Duplex connection to the remote analysis service.
//!
//! The session controller talks to the connection through the [`Transport`]
//! and [`TransportConnector`] traits so tests (and other backends) can
//! substitute doubles. Inbound traffic is not part of the control contract:
//! text frames are logged, binary frames ignored. Errors and closes are
//! reported upward as [`TransportEvent`]s, never as panics.

pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::EncodedChunk;
use crate::error::SessionError;

pub use ws::{WebSocketConnector, WebSocketTransport};

/// Signals surfaced from the connection to the session controller.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Text frame from the remote side (log-only, not acted upon)
    Text(String),
    /// The remote side closed the connection
    Closed {
        /// Close reason, if the remote supplied one
        reason: Option<String>,
    },
    /// The connection failed
    Error(String),
}

/// An established connection that accepts encoded chunks.
#[async_trait]
pub trait Transport: Send {
    /// Whether the connection currently accepts outbound data.
    fn is_open(&self) -> bool;

    /// Delivers one chunk as a single binary frame.
    ///
    /// Rejected with `TransportError` when the connection is not open;
    /// nothing is queued or silently dropped.
    async fn send(&mut self, chunk: EncodedChunk) -> Result<(), SessionError>;

    /// Closes the connection. Idempotent: safe to call repeatedly and safe
    /// to call when the remote side already closed.
    async fn close(&mut self);
}

/// Establishes transports for new sessions.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Opens a connection to `address`.
    ///
    /// Resolves to the transport plus its inbound event stream, or fails
    /// with `ConnectFailure`.
    async fn connect(
        &self,
        address: &str,
    ) -> Result<(Box<dyn Transport>, mpsc::Receiver<TransportEvent>), SessionError>;
}
