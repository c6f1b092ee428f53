use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the pairing engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PairingConfig {
    /// Pause between cycles in continuous mode.
    pub interval_secs: u64,

    /// Widest gap between two observations that still form a pair. The time penalty
    /// reaches zero here.
    pub max_time_diff_secs: f64,

    /// Both sides of a pair need at least this average confidence.
    pub confidence_threshold: f64,

    /// Observations read back per source, and the cap on pairs per cycle.
    pub limit: usize,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            max_time_diff_secs: 5.0,
            confidence_threshold: 0.5,
            limit: 100,
        }
    }
}

impl PairingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
