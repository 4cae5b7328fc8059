//! Health report data models.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Classification of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    /// Reachable but slower than the warn threshold
    Degraded,
    Down,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Degraded => write!(f, "degraded"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Result of one health probe. Produced fresh on every probe, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    pub state: HealthState,
    pub error: Option<String>,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.state == HealthState::Ok
    }

    /// Serving traffic is still possible (ok or degraded).
    pub fn is_available(&self) -> bool {
        self.state != HealthState::Down
    }
}
