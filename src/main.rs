use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use meetcap::{
    Config, SessionConfig, SessionController, SyntheticSourceProvider, WebSocketConnector,
};
use tracing::info;

/// Captures microphone + display audio, mixes them, and streams encoded
/// chunks to the analysis service until Ctrl-C.
#[derive(Debug, Parser)]
#[command(name = "meetcap", version)]
struct Args {
    /// Path to a config file (e.g. config/meetcap)
    #[arg(long)]
    config: Option<String>,

    /// Analysis service address (overrides the config file)
    #[arg(long)]
    server_url: Option<String>,

    /// Chunk emission interval in milliseconds (overrides the config file)
    #[arg(long)]
    chunk_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut session_config = match &args.config {
        Some(path) => Config::load(path)?.session_config(),
        None => SessionConfig::default(),
    };
    if let Some(url) = args.server_url {
        session_config.server_url = url;
    }
    if let Some(ms) = args.chunk_interval_ms {
        session_config.chunk_interval = std::time::Duration::from_millis(ms);
    }

    info!("meetcap v0.1.0");
    info!("Session: {}", session_config.session_id);
    info!("Streaming to {}", session_config.server_url);

    // Tone generator stands in for hardware capture; real device backends
    // plug in through the SourceProvider trait.
    let provider = Arc::new(SyntheticSourceProvider::new(
        session_config.sample_rate,
        session_config.channels,
    ));
    let connector = Arc::new(WebSocketConnector::new(session_config.connect_timeout));

    let controller = SessionController::spawn(session_config, provider, connector);

    // Mirror status updates to the log, the way the UI would show them.
    let mut status = controller.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow().clone();
            info!("Status: {}: {}", current.state, current.message);
        }
    });

    controller.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, stopping");

    let final_state = controller.stop().await;
    let stats = controller.stats();
    info!(
        "Session ended in {} ({} chunks sent, {} dropped, {:.1}s)",
        final_state, stats.chunks_sent, stats.chunks_dropped, stats.duration_secs
    );

    Ok(())
}
