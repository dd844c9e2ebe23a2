use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::config::SessionConfig;
use super::state::{SessionState, SessionStatus};
use super::stats::{SessionCounters, SessionStats};
use crate::audio::{
    AcquiredSources, AudioMixer, ChunkEncoder, EncodedChunk, EncoderConfig, EncoderHandle,
    MixerConfig, SourceAcquirer, SourceProvider,
};
use crate::error::SessionError;
use crate::transport::{Transport, TransportConnector, TransportEvent};

enum Command {
    Start(oneshot::Sender<Result<(), SessionError>>),
    Stop(oneshot::Sender<SessionState>),
}

/// Drives the capture -> mix -> encode -> stream pipeline.
///
/// All lifecycle transitions run inside one actor task, reacting to
/// commands, encoder events and transport signals one at a time; the session
/// context is never touched by two handlers concurrently. The observer side
/// watches [`SessionStatus`] and issues `start()` / `stop()` — no other
/// control surface exists.
pub struct SessionController {
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<SessionStatus>,
    counters: Arc<SessionCounters>,
    _task: JoinHandle<()>,
}

impl SessionController {
    /// Spawns the controller with its capability providers.
    pub fn spawn(
        config: SessionConfig,
        provider: Arc<dyn SourceProvider>,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (status_tx, status_rx) = watch::channel(SessionStatus::idle());
        let counters = Arc::new(SessionCounters::default());

        let ctx = SessionContext {
            config,
            provider,
            connector,
            cmd_rx,
            status_tx,
            counters: Arc::clone(&counters),
            state: SessionState::Idle,
        };

        let task = tokio::spawn(run(ctx));

        Self {
            cmd_tx,
            status_rx,
            counters,
            _task: task,
        }
    }

    /// Starts a capture session.
    ///
    /// Only valid while no session is active (Idle or Disconnected).
    /// Resolves with `Ok` once the session reaches Recording, or with the
    /// error that ended the attempt (`Cancelled` if `stop()` won the race).
    pub async fn start(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Start(tx))
            .await
            .map_err(|_| SessionError::Internal("session controller is gone".to_string()))?;
        rx.await
            .map_err(|_| SessionError::Internal("session controller dropped the request".to_string()))?
    }

    /// Stops the active session, if any. Idempotent: repeated calls resolve
    /// to the same resting state. Effective even while the session is
    /// suspended in a permission or connection wait.
    pub async fn stop(&self) -> SessionState {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop(tx)).await.is_err() {
            return self.state();
        }
        rx.await.unwrap_or(SessionState::Idle)
    }

    /// Observable status for the UI layer.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    pub fn state(&self) -> SessionState {
        self.status_rx.borrow().state
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot(self.state())
    }
}

/// The one explicitly owned session context; every handler runs against it
/// inside the actor task.
struct SessionContext {
    config: SessionConfig,
    provider: Arc<dyn SourceProvider>,
    connector: Arc<dyn TransportConnector>,
    cmd_rx: mpsc::Receiver<Command>,
    status_tx: watch::Sender<SessionStatus>,
    counters: Arc<SessionCounters>,
    state: SessionState,
}

impl SessionContext {
    fn publish(&mut self, state: SessionState, message: impl Into<String>) {
        debug_assert!(
            self.state.can_transition(state),
            "illegal session state transition: {} -> {}",
            self.state,
            state
        );
        let message = message.into();
        info!("Session state: {} ({})", state, message);
        self.state = state;
        self.status_tx.send_replace(SessionStatus { state, message });
    }

    /// Reports a failure: Failed is published for observers, then the
    /// session settles to Idle with the error message retained.
    fn fail(&mut self, err: SessionError, ack: oneshot::Sender<Result<(), SessionError>>) {
        error!("Session failed: {}", err);
        let message = format!("Error: {}", err);
        self.publish(SessionState::Failed, message.clone());
        self.publish(SessionState::Idle, message);
        let _ = ack.send(Err(err));
    }
}

async fn run(mut ctx: SessionContext) {
    while let Some(cmd) = ctx.cmd_rx.recv().await {
        match cmd {
            Command::Start(ack) => {
                if !ctx.state.is_resting() {
                    let _ = ack.send(Err(SessionError::NotIdle(ctx.state)));
                    continue;
                }
                run_session(&mut ctx, ack).await;
            }
            Command::Stop(ack) => {
                // Nothing active: stop is a no-op.
                let _ = ack.send(ctx.state);
            }
        }
    }
}

/// One complete start-to-rest lifecycle. Every exit path releases the
/// acquired sources and closes the transport (if any) before returning.
async fn run_session(ctx: &mut SessionContext, ack: oneshot::Sender<Result<(), SessionError>>) {
    info!("Starting session {}", ctx.config.session_id);

    // --- RequestingPermissions -------------------------------------------
    ctx.publish(
        SessionState::RequestingPermissions,
        "Requesting permissions...",
    );

    let acquirer = SourceAcquirer::new(Arc::clone(&ctx.provider), ctx.config.acquire_timeout);
    let mut acquire_task = tokio::spawn(async move { acquirer.acquire().await });

    let mut sources: AcquiredSources = loop {
        tokio::select! {
            res = &mut acquire_task => {
                match res {
                    Ok(Ok(sources)) => break sources,
                    Ok(Err(e)) => {
                        ctx.fail(e, ack);
                        return;
                    }
                    Err(e) => {
                        ctx.fail(
                            SessionError::Internal(format!("acquisition task failed: {e}")),
                            ack,
                        );
                        return;
                    }
                }
            }
            cmd = ctx.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Start(dup)) => {
                        let _ = dup.send(Err(SessionError::NotIdle(ctx.state)));
                    }
                    other => {
                        info!("Stop requested during acquisition");
                        ctx.publish(SessionState::Stopping, "Stopping...");
                        // Whatever resolves after the cancel must still be
                        // released, not silently kept alive.
                        tokio::spawn(async move {
                            if let Ok(Ok(mut sources)) = acquire_task.await {
                                sources.release_all();
                            }
                        });
                        ctx.publish(SessionState::Idle, "Recording stopped.");
                        let _ = ack.send(Err(SessionError::Cancelled));
                        if let Some(Command::Stop(stop_ack)) = other {
                            let _ = stop_ack.send(SessionState::Idle);
                        }
                        return;
                    }
                }
            }
        }
    };

    // --- Connecting ------------------------------------------------------
    ctx.publish(SessionState::Connecting, "Connecting to server...");

    let connector = Arc::clone(&ctx.connector);
    let address = ctx.config.server_url.clone();
    let mut connect_task = tokio::spawn(async move { connector.connect(&address).await });

    let (mut transport, mut transport_events) = loop {
        tokio::select! {
            res = &mut connect_task => {
                match res {
                    Ok(Ok(pair)) => break pair,
                    Ok(Err(e)) => {
                        sources.release_all();
                        ctx.fail(e, ack);
                        return;
                    }
                    Err(e) => {
                        sources.release_all();
                        ctx.fail(SessionError::Internal(format!("connect task failed: {e}")), ack);
                        return;
                    }
                }
            }
            cmd = ctx.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Start(dup)) => {
                        let _ = dup.send(Err(SessionError::NotIdle(ctx.state)));
                    }
                    other => {
                        info!("Stop requested during connect");
                        ctx.publish(SessionState::Stopping, "Stopping...");
                        sources.release_all();
                        // A connection resolving after the cancel is closed,
                        // not leaked.
                        tokio::spawn(async move {
                            if let Ok(Ok((mut transport, _events))) = connect_task.await {
                                transport.close().await;
                            }
                        });
                        ctx.publish(SessionState::Idle, "Recording stopped.");
                        let _ = ack.send(Err(SessionError::Cancelled));
                        if let Some(Command::Stop(stop_ack)) = other {
                            let _ = stop_ack.send(SessionState::Idle);
                        }
                        return;
                    }
                }
            }
        }
    };

    // --- Mixer + Encoder -------------------------------------------------
    let mic_rx = sources.microphone.take_frames();
    let display_rx = sources.display.audio_mut().and_then(|a| a.take_frames());
    let (Some(mic_rx), Some(display_rx)) = (mic_rx, display_rx) else {
        sources.release_all();
        transport.close().await;
        ctx.fail(
            SessionError::Internal("source streams unavailable".to_string()),
            ack,
        );
        return;
    };

    let mixer = AudioMixer::new(MixerConfig {
        sample_rate: ctx.config.sample_rate,
        channels: ctx.config.channels,
        max_buffer_delay_ms: ctx.config.max_buffer_delay_ms,
    });
    let mixed = mixer.spawn(mic_rx, display_rx);

    // Capacity 1: at most one chunk in flight between encoder and transport.
    let (chunk_tx, mut chunk_rx) = mpsc::channel(1);
    let (started_tx, started_rx) = oneshot::channel();
    let mut encoder = ChunkEncoder::new(EncoderConfig {
        chunk_interval: ctx.config.chunk_interval,
        sample_rate: ctx.config.sample_rate,
        channels: ctx.config.channels,
    })
    .spawn(mixed, chunk_tx, started_tx);

    // The encoder's start confirmation is the single trigger for Recording.
    let mut started_rx = started_rx;
    loop {
        tokio::select! {
            res = &mut started_rx => {
                match res {
                    Ok(()) => break,
                    Err(_) => {
                        teardown(ctx, &mut encoder, &mut chunk_rx, &mut sources, &mut transport).await;
                        ctx.publish(SessionState::Idle, "Error: encoder failed to start");
                        let _ = ack.send(Err(SessionError::Internal(
                            "encoder failed to start".to_string(),
                        )));
                        return;
                    }
                }
            }
            cmd = ctx.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Start(dup)) => {
                        let _ = dup.send(Err(SessionError::NotIdle(ctx.state)));
                    }
                    other => {
                        teardown(ctx, &mut encoder, &mut chunk_rx, &mut sources, &mut transport).await;
                        ctx.publish(SessionState::Idle, "Recording stopped.");
                        let _ = ack.send(Err(SessionError::Cancelled));
                        if let Some(Command::Stop(stop_ack)) = other {
                            let _ = stop_ack.send(SessionState::Idle);
                        }
                        return;
                    }
                }
            }
        }
    }

    ctx.counters.mark_started();
    ctx.publish(SessionState::Recording, "Recording...");
    let _ = ack.send(Ok(()));

    // --- Recording -------------------------------------------------------
    loop {
        tokio::select! {
            maybe_chunk = chunk_rx.recv() => {
                match maybe_chunk {
                    Some(chunk) => {
                        if transport.is_open() {
                            match transport.send(chunk).await {
                                Ok(()) => {
                                    ctx.counters.chunks_sent.fetch_add(1, Ordering::SeqCst);
                                }
                                Err(e) => {
                                    ctx.counters.chunks_dropped.fetch_add(1, Ordering::SeqCst);
                                    warn!("Chunk rejected by transport: {}", e);
                                }
                            }
                        } else {
                            // Reject-and-count: nothing is queued while the
                            // transport cannot accept data.
                            ctx.counters.chunks_dropped.fetch_add(1, Ordering::SeqCst);
                            warn!("Transport not open, chunk rejected");
                        }
                    }
                    None => {
                        info!("Mixed signal ended, stopping session");
                        teardown(ctx, &mut encoder, &mut chunk_rx, &mut sources, &mut transport).await;
                        ctx.publish(SessionState::Idle, "Recording stopped.");
                        return;
                    }
                }
            }
            event = transport_events.recv() => {
                match event {
                    Some(TransportEvent::Text(_)) => {
                        // Log-only; the transport reader already recorded it.
                    }
                    Some(TransportEvent::Error(e)) => {
                        error!("Transport error during recording: {}", e);
                        teardown(ctx, &mut encoder, &mut chunk_rx, &mut sources, &mut transport).await;
                        ctx.publish(
                            SessionState::Disconnected,
                            format!("Error: {}", SessionError::TransportError(e)),
                        );
                        return;
                    }
                    Some(TransportEvent::Closed { reason }) => {
                        warn!("Server closed the connection during recording: {:?}", reason);
                        teardown(ctx, &mut encoder, &mut chunk_rx, &mut sources, &mut transport).await;
                        ctx.publish(
                            SessionState::Disconnected,
                            format!("Error: {}", SessionError::TransportClosedUnexpectedly),
                        );
                        return;
                    }
                    None => {
                        warn!("Transport event stream ended during recording");
                        teardown(ctx, &mut encoder, &mut chunk_rx, &mut sources, &mut transport).await;
                        ctx.publish(
                            SessionState::Disconnected,
                            format!("Error: {}", SessionError::TransportClosedUnexpectedly),
                        );
                        return;
                    }
                }
            }
            cmd = ctx.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Start(dup)) => {
                        let _ = dup.send(Err(SessionError::NotIdle(ctx.state)));
                    }
                    Some(Command::Stop(stop_ack)) => {
                        teardown(ctx, &mut encoder, &mut chunk_rx, &mut sources, &mut transport).await;
                        ctx.publish(SessionState::Idle, "Recording stopped.");
                        let _ = stop_ack.send(SessionState::Idle);
                        return;
                    }
                    None => {
                        teardown(ctx, &mut encoder, &mut chunk_rx, &mut sources, &mut transport).await;
                        ctx.publish(SessionState::Idle, "Recording stopped.");
                        return;
                    }
                }
            }
        }
    }
}

/// The Stopping sequence shared by every exit path: stop the encoder,
/// release both sources, close the transport.
async fn teardown(
    ctx: &mut SessionContext,
    encoder: &mut EncoderHandle,
    chunk_rx: &mut mpsc::Receiver<EncodedChunk>,
    sources: &mut AcquiredSources,
    transport: &mut Box<dyn Transport>,
) {
    ctx.publish(SessionState::Stopping, "Stopping...");
    // A chunk may be parked in the capacity-1 channel with the encoder
    // blocked on its next send; close and drain the channel so the encoder
    // task can observe the shutdown instead of waiting on us.
    chunk_rx.close();
    while chunk_rx.try_recv().is_ok() {}
    encoder.stop().await;
    sources.release_all();
    transport.close().await;
}
