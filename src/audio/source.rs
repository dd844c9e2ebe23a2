use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::SessionError;

/// Audio stream source type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Microphone input (user's voice)
    Microphone,
    /// Audio track of the shared screen/window/tab
    DisplayAudio,
}

/// Lifecycle state of an acquired source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// The underlying device stream is live
    Active,
    /// The device stream has been stopped and released
    Stopped,
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    /// Which source produced this frame
    pub source: SourceKind,
}

/// Handle to one live audio source.
///
/// Owns the device stream: frames arrive on the channel until the source is
/// released. `release()` is idempotent and also runs on drop, so a handle is
/// stopped exactly once no matter which exit path reaches it first.
pub struct AudioSourceHandle {
    kind: SourceKind,
    state: SourceState,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl AudioSourceHandle {
    pub fn new(
        kind: SourceKind,
        frames: mpsc::Receiver<AudioFrame>,
        shutdown: oneshot::Sender<()>,
    ) -> Self {
        Self {
            kind,
            state: SourceState::Active,
            frames: Some(frames),
            shutdown: Some(shutdown),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Takes the frame stream, handing it to the mixer.
    ///
    /// Returns `None` if the stream was already taken.
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.frames.take()
    }

    /// Stops the underlying device stream. Idempotent.
    pub fn release(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The provider side may already be gone; that still counts as stopped.
            let _ = shutdown.send(());
            self.state = SourceState::Stopped;
            info!("Released {:?} source", self.kind);
        }
    }
}

impl Drop for AudioSourceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Result of the display/window/tab capture request.
///
/// The shared surface always carries video; the audio track is optional
/// (a plain window on some platforms has none). The guard keeps the whole
/// display stream alive until release.
pub struct DisplayCapture {
    audio: Option<AudioSourceHandle>,
    guard: Option<oneshot::Sender<()>>,
}

impl DisplayCapture {
    pub fn new(audio: Option<AudioSourceHandle>, guard: oneshot::Sender<()>) -> Self {
        Self {
            audio,
            guard: Some(guard),
        }
    }

    /// Whether the shared surface provided at least one audio track.
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn audio_mut(&mut self) -> Option<&mut AudioSourceHandle> {
        self.audio.as_mut()
    }

    /// Stops the display stream (video and audio). Idempotent.
    pub fn release(&mut self) {
        if let Some(audio) = &mut self.audio {
            audio.release();
        }
        if let Some(guard) = self.guard.take() {
            let _ = guard.send(());
            info!("Released display stream");
        }
    }
}

impl Drop for DisplayCapture {
    fn drop(&mut self) {
        self.release();
    }
}

/// Capability boundary for the two capture requests.
///
/// Implementations wrap the platform capture backend (or a synthetic
/// generator); they hold no pipeline logic of their own.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Requests microphone audio.
    async fn request_microphone(&self) -> Result<AudioSourceHandle, SessionError>;

    /// Requests display/window/tab capture (audio + video).
    async fn request_display(&self) -> Result<DisplayCapture, SessionError>;
}

/// The microphone + display source pair owned by a session.
pub struct AcquiredSources {
    pub microphone: AudioSourceHandle,
    pub display: DisplayCapture,
}

impl AcquiredSources {
    /// Releases both sources. Idempotent; also runs via the handles' drops.
    pub fn release_all(&mut self) {
        self.microphone.release();
        self.display.release();
    }
}

/// Issues both capture requests and validates the result.
pub struct SourceAcquirer {
    provider: std::sync::Arc<dyn SourceProvider>,
    acquire_timeout: Duration,
}

impl SourceAcquirer {
    pub fn new(provider: std::sync::Arc<dyn SourceProvider>, acquire_timeout: Duration) -> Self {
        Self {
            provider,
            acquire_timeout,
        }
    }

    /// Requests microphone and display capture concurrently.
    ///
    /// Fails with `PermissionDenied` if either request is rejected or times
    /// out, and with `NoDisplayAudio` if the shared surface has no audio
    /// track. On every failure path, whatever did resolve is released before
    /// returning, so no device handle outlives the call.
    pub async fn acquire(&self) -> Result<AcquiredSources, SessionError> {
        info!("Requesting microphone and display capture");

        let mic_fut = timeout(self.acquire_timeout, self.provider.request_microphone());
        let display_fut = timeout(self.acquire_timeout, self.provider.request_display());

        let (mic_res, display_res) = tokio::join!(mic_fut, display_fut);

        let mic_res = match mic_res {
            Ok(inner) => inner,
            Err(_) => Err(SessionError::microphone_denied(format!(
                "timed out after {:?} waiting for permission",
                self.acquire_timeout
            ))),
        };
        let display_res = match display_res {
            Ok(inner) => inner,
            Err(_) => Err(SessionError::display_denied(format!(
                "timed out after {:?} waiting for permission",
                self.acquire_timeout
            ))),
        };

        let (microphone, mut display) = match (mic_res, display_res) {
            (Ok(mic), Ok(display)) => (mic, display),
            (Ok(mut mic), Err(e)) => {
                warn!("Display request failed, releasing microphone: {}", e);
                mic.release();
                return Err(e);
            }
            (Err(e), Ok(mut display)) => {
                warn!("Microphone request failed, releasing display stream: {}", e);
                display.release();
                return Err(e);
            }
            (Err(e), Err(other)) => {
                warn!("Both capture requests failed: {} / {}", e, other);
                return Err(e);
            }
        };

        if !display.has_audio() {
            let mut microphone = microphone;
            warn!("Display stream has no audio track, releasing both sources");
            microphone.release();
            display.release();
            return Err(SessionError::NoDisplayAudio);
        }

        info!("Both audio sources acquired");

        Ok(AcquiredSources {
            microphone,
            display,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(kind: SourceKind) -> (AudioSourceHandle, oneshot::Receiver<()>) {
        let (_frame_tx, frame_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        (AudioSourceHandle::new(kind, frame_rx, shutdown_tx), shutdown_rx)
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut h, mut rx) = handle(SourceKind::Microphone);
        assert_eq!(h.state(), SourceState::Active);

        h.release();
        h.release();

        assert_eq!(h.state(), SourceState::Stopped);
        assert!(rx.try_recv().is_ok());
        // A second release must not have produced a second signal.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drop_releases() {
        let (h, mut rx) = handle(SourceKind::DisplayAudio);
        drop(h);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_take_frames_once() {
        let (mut h, _rx) = handle(SourceKind::Microphone);
        assert!(h.take_frames().is_some());
        assert!(h.take_frames().is_none());
    }

    #[test]
    fn test_display_capture_without_audio() {
        let (guard_tx, mut guard_rx) = oneshot::channel();
        let mut capture = DisplayCapture::new(None, guard_tx);
        assert!(!capture.has_audio());

        capture.release();
        assert!(guard_rx.try_recv().is_ok());
    }
}
