//! Batch-mode outcome rows, one per processed file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub id: Option<i64>,
    pub run_id: String,
    pub image_path: String,
    pub image_filename: String,
    /// Label of the batch folder the file came from.
    pub classification: String,
    pub model_output: Option<Value>,
    /// Kept confidences, comma separated with three decimals.
    pub confidence_scores: String,
    pub processing_secs: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub person_count: u32,
    pub avg_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub min_confidence: Option<f64>,
    pub uncertain: bool,
    pub recorded_at: DateTime<Utc>,
}

pub fn format_confidences(confidences: &[f64]) -> String {
    confidences
        .iter()
        .map(|c| format!("{c:.3}"))
        .collect::<Vec<_>>()
        .join(",")
}
