use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::session::SessionConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub max_buffer_delay_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct StreamConfig {
    pub server_url: String,
    pub chunk_interval_ms: u64,
    pub acquire_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Builds a per-session config from the file settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            server_url: self.stream.server_url.clone(),
            chunk_interval: Duration::from_millis(self.stream.chunk_interval_ms),
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            max_buffer_delay_ms: self.audio.max_buffer_delay_ms,
            acquire_timeout: Duration::from_secs(self.stream.acquire_timeout_secs),
            connect_timeout: Duration::from_secs(self.stream.connect_timeout_secs),
            ..SessionConfig::default()
        }
    }
}
