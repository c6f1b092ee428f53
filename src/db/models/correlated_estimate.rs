//! Reconciled occupancy estimates. Append-only; written by the pairing engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which estimation rule produced the count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    Agreement,
    DivergenceMax,
    ConfidenceWinner,
    WeightedAverage,
}

/// Audit trail stored next to every estimate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Derivation {
    pub method: EstimationMethod,
    /// Confidence-weighted mean of the two raw counts, two decimals.
    pub weighted_count: f64,
    pub time_penalty: f64,
    pub x_confidence: f64,
    pub y_confidence: f64,
    pub difference: u32,
    pub agreement: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatedEstimate {
    pub id: Option<i64>,
    pub source_x_id: i64,
    pub source_y_id: i64,
    pub count_x: u32,
    pub count_y: u32,
    pub estimated_count: u32,
    pub confidence: f64,
    pub time_diff_secs: f64,
    pub derivation: Derivation,
    pub created_at: DateTime<Utc>,
}

/// Aggregate over the estimates of a recent time window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EstimateSummary {
    pub total: u64,
    pub avg_count: f64,
    pub min_count: u32,
    pub max_count: u32,
    pub avg_confidence: f64,
    pub avg_time_diff_secs: f64,
}
