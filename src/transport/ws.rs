//! WebSocket implementation of the chunk transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Transport, TransportConnector, TransportEvent};
use crate::audio::EncodedChunk;
use crate::error::SessionError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connects WebSocket transports with a bounded connect timeout.
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(
        &self,
        address: &str,
    ) -> Result<(Box<dyn Transport>, mpsc::Receiver<TransportEvent>), SessionError> {
        info!("Connecting to {}", address);

        let connect = connect_async(address);
        let (stream, _response) = match timeout(self.connect_timeout, connect).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => {
                return Err(SessionError::ConnectFailure {
                    address: address.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(SessionError::ConnectFailure {
                    address: address.to_string(),
                    reason: format!("timed out after {:?}", self.connect_timeout),
                })
            }
        };

        info!("Connected to {}", address);

        let (sink, mut inbound) = stream.split();
        let open = Arc::new(AtomicBool::new(true));
        let (event_tx, event_rx) = mpsc::channel(16);

        // Reader task: forwards remote signals to the controller. Text
        // frames carry no control meaning and are only logged.
        let reader_open = Arc::clone(&open);
        tokio::spawn(async move {
            while let Some(msg) = inbound.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        log_server_message(&text);
                        let _ = event_tx.send(TransportEvent::Text(text)).await;
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        info!("Server closed the connection: {:?}", reason);
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(TransportEvent::Closed { reason }).await;
                        return;
                    }
                    Ok(other) => {
                        debug!("Ignoring inbound frame: {:?}", other);
                    }
                    Err(e) => {
                        warn!("WebSocket error: {}", e);
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }

            // Stream ended without a close frame.
            if reader_open.swap(false, Ordering::SeqCst) {
                let _ = event_tx.send(TransportEvent::Closed { reason: None }).await;
            }
        });

        let transport = WebSocketTransport {
            sink,
            open,
            close_sent: false,
        };

        Ok((Box::new(transport), event_rx))
    }
}

/// Server text frames are JSON status messages (acks, progress notes).
/// They carry no control meaning for the session; log the message type when
/// the payload parses, the raw text otherwise.
fn log_server_message(text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => {
            let kind = value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("unknown");
            info!("Server message ({}): {}", kind, text);
        }
        Err(_) => info!("Server message: {}", text),
    }
}

/// One persistent WebSocket connection; chunks go out as binary frames.
pub struct WebSocketTransport {
    sink: WsSink,
    open: Arc<AtomicBool>,
    close_sent: bool,
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn is_open(&self) -> bool {
        !self.close_sent && self.open.load(Ordering::SeqCst)
    }

    async fn send(&mut self, chunk: EncodedChunk) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::TransportError(
                "connection is not open".to_string(),
            ));
        }

        let bytes = chunk.data.len();
        self.sink
            .send(Message::Binary(chunk.data))
            .await
            .map_err(|e| {
                self.open.store(false, Ordering::SeqCst);
                SessionError::TransportError(e.to_string())
            })?;

        debug!("Sent chunk {} ({} bytes)", chunk.sequence, bytes);
        Ok(())
    }

    async fn close(&mut self) {
        if self.close_sent {
            return;
        }
        self.close_sent = true;
        self.open.store(false, Ordering::SeqCst);

        // Best effort: the remote side may already be gone.
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!("Close handshake not delivered: {}", e);
        }
        let _ = self.sink.flush().await;
        info!("Transport closed");
    }
}
