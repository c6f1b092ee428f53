//! Per-item detector outcomes tagged by vantage point.
//!
//! An observation is written once and never updated. Live sessions store one row per
//! decoded input; the pairing engine only ever reads them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One of the two independent vantage points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    X,
    Y,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::X, Source::Y];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::X => "x",
            Source::Y => "y",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: Option<i64>,
    pub run_id: Option<String>,
    pub source: Source,
    pub observed_at: DateTime<Utc>,
    pub person_count: u32,
    pub avg_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub min_confidence: Option<f64>,
    pub raw_output: Value,
    pub success: bool,
    pub error_message: Option<String>,
}

impl Observation {
    /// Every confidence is either absent or inside [0, 1].
    pub fn confidences_in_range(&self) -> bool {
        [self.avg_confidence, self.max_confidence, self.min_confidence]
            .iter()
            .flatten()
            .all(|value| (0.0..=1.0).contains(value))
    }
}

/// Two observations from opposite sources close enough in time to be reconciled.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationPair {
    pub x: Observation,
    pub y: Observation,
    /// Absolute gap between the two timestamps.
    pub time_diff_secs: f64,
}
