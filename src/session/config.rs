use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier
    pub session_id: String,

    /// Address of the remote analysis service
    pub server_url: String,

    /// Emission cadence of the encoder (one chunk per interval)
    pub chunk_interval: Duration,

    /// Sample rate of the pipeline
    pub sample_rate: u32,

    /// Channel count of the pipeline (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Mixer buffering bound in milliseconds
    pub max_buffer_delay_ms: u64,

    /// How long to wait for the permission prompts before giving up
    pub acquire_timeout: Duration,

    /// How long to wait for the connection before giving up
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            server_url: "ws://localhost:8000/ws".to_string(),
            chunk_interval: Duration::from_millis(1000),
            sample_rate: 16000,
            channels: 1,
            max_buffer_delay_ms: 200,
            acquire_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}
