// Integration tests for the session lifecycle
//
// These tests drive the SessionController with mock capability providers
// and verify the resource-release and state-transition guarantees: every
// acquired source is released on every exit path, the transport is closed
// exactly once, and stop() is idempotent.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use meetcap::audio::{
    AudioFrame, AudioSourceHandle, DisplayCapture, EncodedChunk, SourceKind, SourceProvider,
};
use meetcap::error::SessionError;
use meetcap::session::{SessionConfig, SessionController, SessionState};
use meetcap::transport::{Transport, TransportConnector, TransportEvent};
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// Mock source provider
// ============================================================================

#[derive(Default)]
struct MockProvider {
    acquisitions: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    display_has_audio: bool,
    deny_microphone: bool,
    acquire_delay: Option<Duration>,
}

impl MockProvider {
    fn new() -> Self {
        Self {
            display_has_audio: true,
            ..Self::default()
        }
    }

    fn without_display_audio(mut self) -> Self {
        self.display_has_audio = false;
        self
    }

    fn denying_microphone(mut self) -> Self {
        self.deny_microphone = true;
        self
    }

    fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = Some(delay);
        self
    }

    /// Builds a live handle that produces silence frames until released,
    /// counting the acquisition now and the release when it lands.
    fn make_handle(&self, kind: SourceKind) -> AudioSourceHandle {
        let (frame_tx, frame_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let releases = Arc::clone(&self.releases);

        tokio::spawn(async move {
            let mut shutdown_rx = shutdown_rx;
            let mut ticker = tokio::time::interval(Duration::from_millis(20));
            let mut timestamp_ms = 0u64;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        releases.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                    _ = ticker.tick() => {
                        let frame = AudioFrame {
                            samples: vec![10i16; 320],
                            sample_rate: 16000,
                            channels: 1,
                            timestamp_ms,
                            source: kind,
                        };
                        timestamp_ms += 20;
                        let _ = frame_tx.try_send(frame);
                    }
                }
            }
        });

        AudioSourceHandle::new(kind, frame_rx, shutdown_tx)
    }
}

#[async_trait]
impl SourceProvider for MockProvider {
    async fn request_microphone(&self) -> Result<AudioSourceHandle, SessionError> {
        if let Some(delay) = self.acquire_delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny_microphone {
            return Err(SessionError::microphone_denied("user rejected the prompt"));
        }
        Ok(self.make_handle(SourceKind::Microphone))
    }

    async fn request_display(&self) -> Result<DisplayCapture, SessionError> {
        if let Some(delay) = self.acquire_delay {
            tokio::time::sleep(delay).await;
        }
        let (guard_tx, _guard_rx) = oneshot::channel();
        let audio = if self.display_has_audio {
            Some(self.make_handle(SourceKind::DisplayAudio))
        } else {
            None
        };
        Ok(DisplayCapture::new(audio, guard_tx))
    }
}

// ============================================================================
// Mock transport
// ============================================================================

#[derive(Default)]
struct MockConnector {
    chunks_received: Arc<AtomicUsize>,
    close_calls: Arc<AtomicUsize>,
    fail_connect: bool,
    connect_delay: Option<Duration>,
    /// Event sender of the most recent connection, for fault injection.
    events: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
}

impl MockConnector {
    fn new() -> Self {
        Self::default()
    }

    fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    async fn inject(&self, event: TransportEvent) {
        let tx = self
            .events
            .lock()
            .unwrap()
            .clone()
            .expect("no connection established yet");
        tx.send(event).await.expect("controller hung up");
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(
        &self,
        address: &str,
    ) -> Result<(Box<dyn Transport>, mpsc::Receiver<TransportEvent>), SessionError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect {
            return Err(SessionError::ConnectFailure {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (event_tx, event_rx) = mpsc::channel(8);
        *self.events.lock().unwrap() = Some(event_tx);

        let transport = MockTransport {
            open: AtomicBool::new(true),
            chunks_received: Arc::clone(&self.chunks_received),
            close_calls: Arc::clone(&self.close_calls),
        };

        Ok((Box::new(transport), event_rx))
    }
}

struct MockTransport {
    open: AtomicBool,
    chunks_received: Arc<AtomicUsize>,
    close_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for MockTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&mut self, _chunk: EncodedChunk) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::TransportError(
                "connection is not open".to_string(),
            ));
        }
        self.chunks_received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config() -> SessionConfig {
    SessionConfig {
        server_url: "ws://mock/ws".to_string(),
        chunk_interval: Duration::from_millis(100),
        acquire_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(1),
        ..SessionConfig::default()
    }
}

/// Polls `condition` until it holds or two seconds pass.
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_no_display_audio_ends_idle_with_all_sources_released() {
    let provider = Arc::new(MockProvider::new().without_display_audio());
    let connector = Arc::new(MockConnector::new());
    let controller =
        SessionController::spawn(test_config(), provider.clone(), connector.clone());

    let err = controller.start().await.expect_err("start should fail");
    assert!(matches!(err, SessionError::NoDisplayAudio));

    assert_eq!(controller.state(), SessionState::Idle);
    assert!(
        controller
            .status()
            .borrow()
            .message
            .contains("no audio track"),
        "status message should say what went wrong"
    );

    // The microphone resolved and must have been released.
    let acquisitions = provider.acquisitions.clone();
    let releases = provider.releases.clone();
    assert!(
        eventually(|| {
            releases.load(Ordering::SeqCst) == acquisitions.load(Ordering::SeqCst)
                && acquisitions.load(Ordering::SeqCst) == 1
        })
        .await
    );
}

#[tokio::test]
async fn test_permission_denied_releases_display() {
    let provider = Arc::new(MockProvider::new().denying_microphone());
    let connector = Arc::new(MockConnector::new());
    let controller =
        SessionController::spawn(test_config(), provider.clone(), connector.clone());

    let err = controller.start().await.expect_err("start should fail");
    assert!(matches!(err, SessionError::PermissionDenied { .. }));
    assert_eq!(controller.state(), SessionState::Idle);

    // Only the display audio track was acquired; it must be released.
    let acquisitions = provider.acquisitions.clone();
    let releases = provider.releases.clone();
    assert!(
        eventually(|| releases.load(Ordering::SeqCst) == acquisitions.load(Ordering::SeqCst))
            .await
    );
}

#[tokio::test]
async fn test_connect_failure_releases_sources() {
    let provider = Arc::new(MockProvider::new());
    let connector = Arc::new(MockConnector::failing());
    let controller =
        SessionController::spawn(test_config(), provider.clone(), connector.clone());

    let err = controller.start().await.expect_err("start should fail");
    assert!(matches!(err, SessionError::ConnectFailure { .. }));
    assert_eq!(controller.state(), SessionState::Idle);

    let acquisitions = provider.acquisitions.clone();
    let releases = provider.releases.clone();
    assert!(
        eventually(|| {
            acquisitions.load(Ordering::SeqCst) == 2
                && releases.load(Ordering::SeqCst) == 2
        })
        .await
    );
}

#[tokio::test]
async fn test_happy_path_streams_chunks_while_recording() {
    let provider = Arc::new(MockProvider::new());
    let connector = Arc::new(MockConnector::new());
    let controller =
        SessionController::spawn(test_config(), provider.clone(), connector.clone());

    controller.start().await.expect("start should succeed");
    assert_eq!(controller.state(), SessionState::Recording);

    // At least one chunk interval elapses; chunks reach the transport.
    let chunks = connector.chunks_received.clone();
    assert!(eventually(|| chunks.load(Ordering::SeqCst) >= 1).await);
    assert_eq!(controller.state(), SessionState::Recording);
    assert!(controller.stats().chunks_sent >= 1);

    let final_state = controller.stop().await;
    assert_eq!(final_state, SessionState::Idle);
    assert_eq!(connector.close_calls.load(Ordering::SeqCst), 1);

    let acquisitions = provider.acquisitions.clone();
    let releases = provider.releases.clone();
    assert!(
        eventually(|| {
            acquisitions.load(Ordering::SeqCst) == 2
                && releases.load(Ordering::SeqCst) == 2
        })
        .await
    );
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let provider = Arc::new(MockProvider::new());
    let connector = Arc::new(MockConnector::new());
    let controller =
        SessionController::spawn(test_config(), provider.clone(), connector.clone());

    // Stop with nothing running is a no-op.
    assert_eq!(controller.stop().await, SessionState::Idle);

    controller.start().await.expect("start should succeed");

    for _ in 0..3 {
        assert_eq!(controller.stop().await, SessionState::Idle);
    }
    assert_eq!(connector.close_calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_transport_error_mid_recording_disconnects() {
    let provider = Arc::new(MockProvider::new());
    let connector = Arc::new(MockConnector::new());
    let controller =
        SessionController::spawn(test_config(), provider.clone(), connector.clone());

    controller.start().await.expect("start should succeed");

    connector
        .inject(TransportEvent::Error("socket reset".to_string()))
        .await;

    let mut status_rx = controller.status();
    status_rx
        .wait_for(|s| s.state == SessionState::Disconnected)
        .await
        .expect("controller should reach Disconnected");

    assert_eq!(connector.close_calls.load(Ordering::SeqCst), 1);

    let acquisitions = provider.acquisitions.clone();
    let releases = provider.releases.clone();
    assert!(
        eventually(|| releases.load(Ordering::SeqCst) == acquisitions.load(Ordering::SeqCst))
            .await
    );
}

#[tokio::test]
async fn test_remote_close_mid_recording_disconnects() {
    let provider = Arc::new(MockProvider::new());
    let connector = Arc::new(MockConnector::new());
    let controller =
        SessionController::spawn(test_config(), provider.clone(), connector.clone());

    controller.start().await.expect("start should succeed");

    connector
        .inject(TransportEvent::Closed {
            reason: Some("server shutting down".to_string()),
        })
        .await;

    let mut status_rx = controller.status();
    status_rx
        .wait_for(|s| s.state == SessionState::Disconnected)
        .await
        .expect("controller should reach Disconnected");
    assert!(
        status_rx.borrow().message.contains("closed unexpectedly"),
        "status message should name the unexpected close"
    );

    // A fresh start is allowed from Disconnected.
    controller.start().await.expect("restart should succeed");
    assert_eq!(controller.state(), SessionState::Recording);
    controller.stop().await;
}

#[tokio::test]
async fn test_stop_during_permission_wait_releases_late_sources() {
    let provider = Arc::new(
        MockProvider::new().with_acquire_delay(Duration::from_millis(300)),
    );
    let connector = Arc::new(MockConnector::new());
    let controller = Arc::new(SessionController::spawn(
        test_config(),
        provider.clone(),
        connector.clone(),
    ));

    let starter = Arc::clone(&controller);
    let start_task = tokio::spawn(async move { starter.start().await });

    // Let the session enter the permission wait, then cancel it.
    let mut status_rx = controller.status();
    status_rx
        .wait_for(|s| s.state == SessionState::RequestingPermissions)
        .await
        .expect("session should be requesting permissions");

    assert_eq!(controller.stop().await, SessionState::Idle);

    let start_result = start_task.await.expect("start task should not panic");
    assert!(matches!(start_result, Err(SessionError::Cancelled)));

    // The requests resolve after the cancel; both handles must still be
    // released rather than silently kept alive.
    let acquisitions = provider.acquisitions.clone();
    let releases = provider.releases.clone();
    assert!(
        eventually(|| {
            acquisitions.load(Ordering::SeqCst) == 2
                && releases.load(Ordering::SeqCst) == 2
        })
        .await
    );
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_stop_during_connect_closes_late_transport() {
    let provider = Arc::new(MockProvider::new());
    let connector = Arc::new(
        MockConnector::new().with_connect_delay(Duration::from_millis(300)),
    );
    let controller = Arc::new(SessionController::spawn(
        test_config(),
        provider.clone(),
        connector.clone(),
    ));

    let starter = Arc::clone(&controller);
    let start_task = tokio::spawn(async move { starter.start().await });

    // Sources are acquired instantly; the session parks in the connect wait.
    let mut status_rx = controller.status();
    status_rx
        .wait_for(|s| s.state == SessionState::Connecting)
        .await
        .expect("session should be connecting");

    assert_eq!(controller.stop().await, SessionState::Idle);

    let start_result = start_task.await.expect("start task should not panic");
    assert!(matches!(start_result, Err(SessionError::Cancelled)));

    // The connection resolves after the cancel; it must be closed, and the
    // already-acquired sources released.
    let close_calls = connector.close_calls.clone();
    assert!(eventually(|| close_calls.load(Ordering::SeqCst) == 1).await);

    let acquisitions = provider.acquisitions.clone();
    let releases = provider.releases.clone();
    assert!(
        eventually(|| {
            acquisitions.load(Ordering::SeqCst) == 2
                && releases.load(Ordering::SeqCst) == 2
        })
        .await
    );
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_start_rejected_while_recording() {
    let provider = Arc::new(MockProvider::new());
    let connector = Arc::new(MockConnector::new());
    let controller =
        SessionController::spawn(test_config(), provider.clone(), connector.clone());

    controller.start().await.expect("start should succeed");

    let err = controller.start().await.expect_err("second start must fail");
    assert!(matches!(err, SessionError::NotIdle(_)));
    assert_eq!(controller.state(), SessionState::Recording);

    controller.stop().await;
}
