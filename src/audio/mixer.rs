// Audio mixer for combining the microphone and display-audio streams
//
// Buffers frames per source, pairs them up, and mixes the samples together
// using simple addition with clipping. If one source ends mid-session (track
// ended, device unplugged) the mixer keeps passing the surviving stream
// through unmixed; the combined output only closes once both inputs end.

use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::source::{AudioFrame, SourceKind};

/// Configuration for the audio mixer
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Expected sample rate of both inputs
    pub sample_rate: u32,
    /// Expected channel count of both inputs
    pub channels: u16,
    /// Maximum buffering delay in milliseconds (default: 200ms)
    /// Frames older than this are dropped to prevent unbounded buffering
    pub max_buffer_delay_ms: u64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            max_buffer_delay_ms: 200,
        }
    }
}

enum MixerInput {
    Frame(AudioFrame),
    Ended(SourceKind),
}

/// The single combined output signal of a session.
///
/// Produced by [`AudioMixer::spawn`]; ownership moves to the encoder for the
/// session's duration.
pub struct MixedSignal {
    rx: mpsc::Receiver<AudioFrame>,
    _pump: JoinHandle<()>,
}

impl MixedSignal {
    /// Receives the next mixed frame; `None` once both inputs have ended.
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        self.rx.recv().await
    }
}

/// Combines the two session audio streams into one signal.
pub struct AudioMixer {
    config: MixerConfig,
    buffers: HashMap<SourceKind, VecDeque<AudioFrame>>,
    ended: HashSet<SourceKind>,
    newest_ms: u64,
}

impl AudioMixer {
    pub fn new(config: MixerConfig) -> Self {
        info!(
            "Audio mixer initialized: {}Hz, {} channels",
            config.sample_rate, config.channels
        );

        let mut buffers = HashMap::new();
        buffers.insert(SourceKind::Microphone, VecDeque::new());
        buffers.insert(SourceKind::DisplayAudio, VecDeque::new());

        Self {
            config,
            buffers,
            ended: HashSet::new(),
            newest_ms: 0,
        }
    }

    /// Connects both source streams and spawns the mixing pump.
    pub fn spawn(
        mut self,
        microphone: mpsc::Receiver<AudioFrame>,
        display: mpsc::Receiver<AudioFrame>,
    ) -> MixedSignal {
        let (out_tx, out_rx) = mpsc::channel(16);
        let (in_tx, mut in_rx) = mpsc::channel(32);

        spawn_forwarder(microphone, SourceKind::Microphone, in_tx.clone());
        spawn_forwarder(display, SourceKind::DisplayAudio, in_tx);

        let pump = tokio::spawn(async move {
            info!("Audio mixing started");

            while let Some(input) = in_rx.recv().await {
                match input {
                    MixerInput::Frame(frame) => self.buffer_frame(frame),
                    MixerInput::Ended(kind) => {
                        warn!("{:?} stream ended, continuing with remaining source", kind);
                        self.ended.insert(kind);
                    }
                }

                while let Some(mixed) = self.mix_next() {
                    if out_tx.send(mixed).await.is_err() {
                        // Encoder gone; nothing left to feed.
                        return;
                    }
                }
            }

            // Flush whatever is still buffered once both inputs are gone.
            self.ended.insert(SourceKind::Microphone);
            self.ended.insert(SourceKind::DisplayAudio);
            while let Some(mixed) = self.mix_next() {
                if out_tx.send(mixed).await.is_err() {
                    return;
                }
            }

            info!("Audio mixing complete");
        });

        MixedSignal {
            rx: out_rx,
            _pump: pump,
        }
    }

    fn buffer_frame(&mut self, frame: AudioFrame) {
        if frame.sample_rate != self.config.sample_rate {
            warn!(
                "Frame sample rate mismatch: expected {}, got {}. Dropping frame.",
                self.config.sample_rate, frame.sample_rate
            );
            return;
        }

        if frame.channels != self.config.channels {
            warn!(
                "Frame channel count mismatch: expected {}, got {}. Dropping frame.",
                self.config.channels, frame.channels
            );
            return;
        }

        self.newest_ms = self.newest_ms.max(frame.timestamp_ms);

        if let Some(buffer) = self.buffers.get_mut(&frame.source) {
            debug!(
                "Buffered {:?} frame: {}ms ({} samples)",
                frame.source,
                frame.timestamp_ms,
                frame.samples.len()
            );
            buffer.push_back(frame);
        }

        self.cleanup_old_frames();
    }

    /// Remove frames that lag too far behind the newest buffered frame.
    fn cleanup_old_frames(&mut self) {
        let cutoff = self.newest_ms.saturating_sub(self.config.max_buffer_delay_ms);

        for (source, buffer) in &mut self.buffers {
            while let Some(frame) = buffer.front() {
                if frame.timestamp_ms < cutoff {
                    warn!(
                        "Dropping stale {:?} frame at {}ms (newest: {}ms)",
                        source, frame.timestamp_ms, self.newest_ms
                    );
                    buffer.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Produces the next output frame, or `None` if more input is needed.
    ///
    /// Mixes a pair when both buffers have a frame; passes a frame through
    /// unmixed once the other source has ended and drained.
    fn mix_next(&mut self) -> Option<AudioFrame> {
        let mic_ready = !self.buffers[&SourceKind::Microphone].is_empty();
        let display_ready = !self.buffers[&SourceKind::DisplayAudio].is_empty();

        if mic_ready && display_ready {
            let a = self
                .buffers
                .get_mut(&SourceKind::Microphone)?
                .pop_front()?;
            let b = self
                .buffers
                .get_mut(&SourceKind::DisplayAudio)?
                .pop_front()?;
            return Some(self.mix_pair(a, b));
        }

        // Single-source passthrough: only when the silent side is finished.
        let passthrough_from = if mic_ready && self.source_drained(SourceKind::DisplayAudio) {
            SourceKind::Microphone
        } else if display_ready && self.source_drained(SourceKind::Microphone) {
            SourceKind::DisplayAudio
        } else {
            return None;
        };

        let frame = self.buffers.get_mut(&passthrough_from)?.pop_front()?;
        debug!(
            "Passing through {:?} frame at {}ms",
            frame.source, frame.timestamp_ms
        );
        Some(frame)
    }

    fn source_drained(&self, kind: SourceKind) -> bool {
        self.ended.contains(&kind) && self.buffers[&kind].is_empty()
    }

    /// Mixes two frames by adding their samples with clipping.
    fn mix_pair(&self, a: AudioFrame, b: AudioFrame) -> AudioFrame {
        let timestamp_ms = a.timestamp_ms.min(b.timestamp_ms);
        let max_len = a.samples.len().max(b.samples.len());
        let mut mixed_samples = Vec::with_capacity(max_len);

        for i in 0..max_len {
            let left = a.samples.get(i).copied().unwrap_or(0) as i32;
            let right = b.samples.get(i).copied().unwrap_or(0) as i32;
            let sum = (left + right).clamp(i16::MIN as i32, i16::MAX as i32);
            mixed_samples.push(sum as i16);
        }

        debug!(
            "Mixed pair at {}ms: {} samples",
            timestamp_ms,
            mixed_samples.len()
        );

        AudioFrame {
            samples: mixed_samples,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            timestamp_ms,
            // The combined signal keeps the microphone tag; downstream only
            // cares about the samples.
            source: SourceKind::Microphone,
        }
    }
}

fn spawn_forwarder(
    mut rx: mpsc::Receiver<AudioFrame>,
    kind: SourceKind,
    tx: mpsc::Sender<MixerInput>,
) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if tx.send(MixerInput::Frame(frame)).await.is_err() {
                return;
            }
        }
        let _ = tx.send(MixerInput::Ended(kind)).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(source: SourceKind, timestamp_ms: u64, samples: Vec<i16>) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate: 16000,
            channels: 1,
            timestamp_ms,
            source,
        }
    }

    #[test]
    fn test_mixer_creation() {
        let mixer = AudioMixer::new(MixerConfig::default());
        assert_eq!(mixer.buffers.len(), 2);
        assert!(mixer.ended.is_empty());
    }

    #[test]
    fn test_mix_pair_equal_length() {
        let mixer = AudioMixer::new(MixerConfig::default());

        let a = frame(SourceKind::Microphone, 0, vec![100, 200, 300]);
        let b = frame(SourceKind::DisplayAudio, 0, vec![50, 100, 150]);

        let mixed = mixer.mix_pair(a, b);
        assert_eq!(mixed.samples, vec![150, 300, 450]);
    }

    #[test]
    fn test_mix_pair_with_clipping() {
        let mixer = AudioMixer::new(MixerConfig::default());

        let a = frame(SourceKind::Microphone, 0, vec![i16::MAX - 100]);
        let b = frame(SourceKind::DisplayAudio, 0, vec![200]);

        let mixed = mixer.mix_pair(a, b);
        assert_eq!(mixed.samples[0], i16::MAX);
    }

    #[test]
    fn test_mix_pair_different_lengths() {
        let mixer = AudioMixer::new(MixerConfig::default());

        let a = frame(SourceKind::Microphone, 0, vec![100, 200]);
        let b = frame(SourceKind::DisplayAudio, 0, vec![50, 100, 150, 200]);

        let mixed = mixer.mix_pair(a, b);
        assert_eq!(mixed.samples, vec![150, 300, 150, 200]);
    }

    #[test]
    fn test_mix_next_waits_for_both_sources() {
        let mut mixer = AudioMixer::new(MixerConfig::default());

        mixer.buffer_frame(frame(SourceKind::Microphone, 0, vec![1, 2, 3]));
        // Display hasn't produced yet and hasn't ended: hold the mic frame.
        assert!(mixer.mix_next().is_none());

        mixer.buffer_frame(frame(SourceKind::DisplayAudio, 0, vec![10, 20, 30]));
        let mixed = mixer.mix_next().unwrap();
        assert_eq!(mixed.samples, vec![11, 22, 33]);
    }

    #[test]
    fn test_passthrough_after_source_ends() {
        let mut mixer = AudioMixer::new(MixerConfig::default());

        mixer.ended.insert(SourceKind::DisplayAudio);
        mixer.buffer_frame(frame(SourceKind::Microphone, 100, vec![7, 8]));

        let out = mixer.mix_next().unwrap();
        assert_eq!(out.samples, vec![7, 8]);
        assert_eq!(out.source, SourceKind::Microphone);
    }

    #[test]
    fn test_stale_frames_dropped() {
        let mut mixer = AudioMixer::new(MixerConfig {
            max_buffer_delay_ms: 200,
            ..MixerConfig::default()
        });

        mixer.buffer_frame(frame(SourceKind::Microphone, 0, vec![1]));
        // A much newer display frame pushes the cutoff past the mic frame.
        mixer.buffer_frame(frame(SourceKind::DisplayAudio, 1000, vec![2]));

        assert!(mixer.buffers[&SourceKind::Microphone].is_empty());
        assert_eq!(mixer.buffers[&SourceKind::DisplayAudio].len(), 1);
    }

    #[test]
    fn test_format_mismatch_dropped() {
        let mut mixer = AudioMixer::new(MixerConfig::default());

        let mut bad = frame(SourceKind::Microphone, 0, vec![1]);
        bad.sample_rate = 44100;
        mixer.buffer_frame(bad);

        assert!(mixer.buffers[&SourceKind::Microphone].is_empty());
    }

    #[tokio::test]
    async fn test_spawn_mixes_two_streams() {
        let (mic_tx, mic_rx) = mpsc::channel(8);
        let (display_tx, display_rx) = mpsc::channel(8);

        let mixer = AudioMixer::new(MixerConfig::default());
        let mut mixed = mixer.spawn(mic_rx, display_rx);

        mic_tx
            .send(frame(SourceKind::Microphone, 0, vec![1, 1]))
            .await
            .unwrap();
        display_tx
            .send(frame(SourceKind::DisplayAudio, 0, vec![2, 2]))
            .await
            .unwrap();

        let out = mixed.recv().await.unwrap();
        assert_eq!(out.samples, vec![3, 3]);

        drop(mic_tx);
        drop(display_tx);
        assert!(mixed.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_spawn_survives_one_stream_ending() {
        let (mic_tx, mic_rx) = mpsc::channel(8);
        let (display_tx, display_rx) = mpsc::channel(8);

        let mixer = AudioMixer::new(MixerConfig::default());
        let mut mixed = mixer.spawn(mic_rx, display_rx);

        drop(display_tx); // display track ends immediately

        mic_tx
            .send(frame(SourceKind::Microphone, 0, vec![5]))
            .await
            .unwrap();

        let out = mixed.recv().await.unwrap();
        assert_eq!(out.samples, vec![5]);

        drop(mic_tx);
        assert!(mixed.recv().await.is_none());
    }
}
