use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use super::state::SessionState;

/// Statistics about a capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Current lifecycle state
    pub state: SessionState,

    /// When the current (or last) recording started, if any
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since recording started
    pub duration_secs: f64,

    /// Chunks delivered to the transport
    pub chunks_sent: u64,

    /// Chunks rejected because the transport was not open
    pub chunks_dropped: u64,
}

/// Counters shared between the controller task and the public handle.
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub chunks_sent: AtomicU64,
    pub chunks_dropped: AtomicU64,
    /// Millisecond unix timestamp of the recording start, 0 = never started
    pub started_at_ms: AtomicI64,
}

impl SessionCounters {
    pub fn mark_started(&self) {
        self.started_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        let ms = self.started_at_ms.load(Ordering::SeqCst);
        if ms == 0 {
            return None;
        }
        DateTime::<Utc>::from_timestamp_millis(ms)
    }

    pub fn snapshot(&self, state: SessionState) -> SessionStats {
        let started_at = self.started_at();
        let duration_secs = started_at
            .map(|t| Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            state,
            started_at,
            duration_secs,
            chunks_sent: self.chunks_sent.load(Ordering::SeqCst),
            chunks_dropped: self.chunks_dropped.load(Ordering::SeqCst),
        }
    }
}
