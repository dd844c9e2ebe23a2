//! Capture session lifecycle
//!
//! This module provides the `SessionController` that manages:
//! - Source acquisition (microphone + display audio)
//! - Mixing and fixed-cadence chunk encoding
//! - Chunk delivery over the transport
//! - State transitions and fault handling
//! - Observable status and session statistics

mod config;
mod controller;
mod state;
mod stats;

pub use config::SessionConfig;
pub use controller::SessionController;
pub use state::{SessionState, SessionStatus};
pub use stats::SessionStats;
