//! Synthetic audio sources for running the pipeline without hardware.
//!
//! Generates deterministic sine tones on a fixed frame cadence, which makes
//! the full capture->mix->encode->stream path exercisable in CI and demos.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::source::{
    AudioFrame, AudioSourceHandle, DisplayCapture, SourceKind, SourceProvider,
};
use crate::error::SessionError;

/// Source provider that generates tones instead of capturing devices.
pub struct SyntheticSourceProvider {
    sample_rate: u32,
    channels: u16,
    frame_interval: Duration,
    /// Whether the simulated display share carries an audio track.
    display_has_audio: bool,
}

impl SyntheticSourceProvider {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            frame_interval: Duration::from_millis(100),
            display_has_audio: true,
        }
    }

    /// Simulates sharing a surface that provides no audio track.
    pub fn without_display_audio(mut self) -> Self {
        self.display_has_audio = false;
        self
    }

    fn spawn_tone(&self, kind: SourceKind, frequency: f64) -> AudioSourceHandle {
        let (frame_tx, frame_rx) = mpsc::channel(16);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let frame_interval = self.frame_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(frame_interval);
            let mut sample_index: u64 = 0;
            let mut timestamp_ms: u64 = 0;
            let frames_per_tick =
                (sample_rate as u64 * frame_interval.as_millis() as u64 / 1000) as usize;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("Synthetic {:?} source stopped", kind);
                        break;
                    }
                    _ = interval.tick() => {
                        let mut samples = Vec::with_capacity(frames_per_tick * channels as usize);
                        for _ in 0..frames_per_tick {
                            let t = sample_index as f64 / sample_rate as f64;
                            let value = (2.0 * std::f64::consts::PI * frequency * t).sin();
                            let sample = (value * 16000.0) as i16;
                            for _ in 0..channels {
                                samples.push(sample);
                            }
                            sample_index += 1;
                        }

                        let frame = AudioFrame {
                            samples,
                            sample_rate,
                            channels,
                            timestamp_ms,
                            source: kind,
                        };
                        timestamp_ms += frame_interval.as_millis() as u64;

                        if frame_tx.send(frame).await.is_err() {
                            // Receiver gone: the mixer shut down before release.
                            break;
                        }
                    }
                }
            }
        });

        AudioSourceHandle::new(kind, frame_rx, shutdown_tx)
    }
}

#[async_trait]
impl SourceProvider for SyntheticSourceProvider {
    async fn request_microphone(&self) -> Result<AudioSourceHandle, SessionError> {
        Ok(self.spawn_tone(SourceKind::Microphone, 440.0))
    }

    async fn request_display(&self) -> Result<DisplayCapture, SessionError> {
        let (guard_tx, _guard_rx) = oneshot::channel();
        let audio = if self.display_has_audio {
            Some(self.spawn_tone(SourceKind::DisplayAudio, 330.0))
        } else {
            None
        };
        Ok(DisplayCapture::new(audio, guard_tx))
    }
}
