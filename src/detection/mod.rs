//! Detector port: turn a decoded image into a person count with confidences.
//!
//! The pipeline only sees the [`Detector`] trait. Backends are chosen from settings
//! when the pipeline is assembled.

mod command;

pub use command::CommandDetector;

use std::sync::Arc;

use anyhow::Result;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::DetectionError;
use crate::settings::{DetectorBackend, DetectorSettings};

const HIGH_CONFIDENCE: f64 = 0.8;
const MEDIUM_CONFIDENCE: f64 = 0.5;

/// Static description of a backend, stored on every run row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorIdentity {
    pub name: String,
    pub version: String,
    pub config: Value,
}

/// One box reported by a backend before filtering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredBox {
    pub label: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

/// Which boxes count towards the person total.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionFilter {
    pub target_label: String,
    pub confidence_threshold: f64,
    /// A detection is flagged uncertain when any kept box scores below this.
    pub uncertain_below: f64,
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            target_label: "person".into(),
            confidence_threshold: 0.5,
            uncertain_below: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub count: u32,
    pub confidences: Vec<f64>,
    pub avg_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub min_confidence: Option<f64>,
    pub uncertain: bool,
    pub raw_output: Value,
}

impl Detection {
    /// Keeps the boxes of the target label at or above the threshold and summarises
    /// them. Confidence statistics are absent when nothing was kept.
    pub fn from_boxes(boxes: &[ScoredBox], filter: &DetectionFilter) -> Result<Self, DetectionError> {
        if let Some(bad) = boxes
            .iter()
            .find(|b| !b.confidence.is_finite() || !(0.0..=1.0).contains(&b.confidence))
        {
            return Err(DetectionError::MalformedOutput(format!(
                "confidence {} outside [0, 1]",
                bad.confidence
            )));
        }

        let kept: Vec<&ScoredBox> = boxes
            .iter()
            .filter(|b| b.label == filter.target_label && b.confidence >= filter.confidence_threshold)
            .collect();
        let confidences: Vec<f64> = kept.iter().map(|b| b.confidence).collect();

        let (avg, max, min) = if confidences.is_empty() {
            (None, None, None)
        } else {
            let sum: f64 = confidences.iter().sum();
            (
                Some(sum / confidences.len() as f64),
                confidences.iter().copied().reduce(f64::max),
                confidences.iter().copied().reduce(f64::min),
            )
        };

        let uncertain = confidences.iter().any(|c| *c < filter.uncertain_below);
        let high = confidences.iter().filter(|c| **c >= HIGH_CONFIDENCE).count();
        let medium = confidences
            .iter()
            .filter(|c| (MEDIUM_CONFIDENCE..HIGH_CONFIDENCE).contains(*c))
            .count();
        let low = confidences.len() - high - medium;

        let raw_output = json!({
            "boxes": kept,
            "totalBoxes": boxes.len(),
            "buckets": { "high": high, "medium": medium, "low": low },
        });

        Ok(Self {
            count: u32::try_from(confidences.len())
                .map_err(|_| DetectionError::MalformedOutput("too many boxes".into()))?,
            confidences,
            avg_confidence: avg,
            max_confidence: max,
            min_confidence: min,
            uncertain,
            raw_output,
        })
    }
}

/// A person detector. Implementations are called from a blocking worker thread.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Detection, DetectionError>;

    fn identity(&self) -> DetectorIdentity;
}

pub fn build_detector(settings: &DetectorSettings) -> Result<Arc<dyn Detector>> {
    let filter = DetectionFilter {
        target_label: settings.target_label.clone(),
        confidence_threshold: settings.confidence_threshold,
        uncertain_below: settings.uncertain_below,
    };

    match &settings.backend {
        DetectorBackend::Command {
            program,
            args,
            model_version,
        } => Ok(Arc::new(CommandDetector::new(
            program.clone(),
            args.clone(),
            model_version.clone(),
            filter,
        ))),
    }
}
