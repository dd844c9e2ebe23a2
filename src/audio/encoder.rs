use std::io::Cursor;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use super::mixer::MixedSignal;

/// Encoder configuration
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Emission cadence: one chunk per interval (default: 1000ms)
    pub chunk_interval: Duration,
    /// Sample rate of the mixed signal
    pub sample_rate: u32,
    /// Channel count of the mixed signal
    pub channels: u16,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            chunk_interval: Duration::from_millis(1000),
            sample_rate: 16000,
            channels: 1,
        }
    }
}

/// One compressed segment of the mixed signal.
///
/// Transient: handed to the transport immediately; the encoder never holds
/// more than the segment currently being accumulated.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Encoded payload (WAV container around the segment's PCM)
    pub data: Vec<u8>,
    /// Emission sequence number, starting at 0
    pub sequence: u32,
    /// Approximate duration (the configured cadence)
    pub duration: Duration,
}

/// Handle to a running encoder task.
pub struct EncoderHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl EncoderHandle {
    /// Stops the encoder, flushing the partial segment, and waits for the
    /// task to finish. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Encoder task panicked: {}", e);
            }
        }
    }
}

/// Segments the mixed signal into fixed-cadence encoded chunks.
pub struct ChunkEncoder {
    config: EncoderConfig,
}

impl ChunkEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Starts encoding the mixed signal.
    ///
    /// Emits one chunk per `chunk_interval` into `chunk_tx` (which should
    /// have capacity 1: at most one chunk in flight, no local queueing).
    /// Fires `started_tx` once the cadence timer is armed; that signal is
    /// the session's transition into Recording.
    pub fn spawn(
        self,
        mut mixed: MixedSignal,
        chunk_tx: mpsc::Sender<EncodedChunk>,
        started_tx: oneshot::Sender<()>,
    ) -> EncoderHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let config = self.config;

        let task = tokio::spawn(async move {
            let first_tick = Instant::now() + config.chunk_interval;
            let mut ticker = interval_at(first_tick, config.chunk_interval);
            let mut pending: Vec<i16> = Vec::new();
            let mut sequence: u32 = 0;

            info!(
                "Chunk encoder started: one chunk per {:?}",
                config.chunk_interval
            );
            let _ = started_tx.send(());

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        flush(&config, &mut pending, &mut sequence, &chunk_tx).await;
                        break;
                    }
                    maybe_frame = mixed.recv() => {
                        match maybe_frame {
                            Some(frame) => {
                                debug!(
                                    "Accumulated {} samples at {}ms",
                                    frame.samples.len(),
                                    frame.timestamp_ms
                                );
                                pending.extend_from_slice(&frame.samples);
                            }
                            None => {
                                // Both sources ended; emit what is left.
                                flush(&config, &mut pending, &mut sequence, &chunk_tx).await;
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if pending.is_empty() {
                            debug!("Empty interval, no chunk emitted");
                            continue;
                        }
                        let samples = std::mem::take(&mut pending);
                        if !emit(&config, samples, &mut sequence, &chunk_tx).await {
                            break;
                        }
                    }
                }
            }

            info!("Chunk encoder stopped after {} chunks", sequence);
        });

        EncoderHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

async fn flush(
    config: &EncoderConfig,
    pending: &mut Vec<i16>,
    sequence: &mut u32,
    chunk_tx: &mpsc::Sender<EncodedChunk>,
) {
    if pending.is_empty() {
        return;
    }
    let samples = std::mem::take(pending);
    emit(config, samples, sequence, chunk_tx).await;
}

/// Encodes one segment and pushes it downstream. Returns `false` when the
/// receiving side is gone.
async fn emit(
    config: &EncoderConfig,
    samples: Vec<i16>,
    sequence: &mut u32,
    chunk_tx: &mpsc::Sender<EncodedChunk>,
) -> bool {
    let data = match encode_wav(&samples, config.sample_rate, config.channels) {
        Ok(data) => data,
        Err(e) => {
            warn!("Failed to encode chunk {}: {}", sequence, e);
            return true;
        }
    };

    let chunk = EncodedChunk {
        data,
        sequence: *sequence,
        duration: config.chunk_interval,
    };
    *sequence += 1;

    debug!(
        "Encoded chunk {} ({} samples, {} bytes)",
        chunk.sequence,
        samples.len(),
        chunk.data.len()
    );

    chunk_tx.send(chunk).await.is_ok()
}

/// Encodes PCM samples into an in-memory WAV payload.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut data = Vec::new();
    {
        let cursor = Cursor::new(&mut data);
        let mut writer =
            hound::WavWriter::new(cursor, spec).context("Failed to create WAV writer")?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV payload")?;
    }

    Ok(data)
}
