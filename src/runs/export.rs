use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::format_confidences;
use crate::detection::{Detection, DetectorIdentity};
use crate::settings::ExportSettings;

use super::state::{ItemOutcome, RunMode, RunSummary};

/// Appends per-item results and finished runs to CSV files. Either file is optional.
///
/// A header is written when a file is created or empty, so repeated runs share one file.
pub struct CsvExporter {
    results_path: Option<PathBuf>,
    runs_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

#[derive(Serialize)]
struct ItemRow<'a> {
    run_id: &'a str,
    mode: &'a str,
    label: &'a str,
    image_path: &'a str,
    success: bool,
    person_count: u32,
    confidence_scores: String,
    avg_confidence: Option<f64>,
    max_confidence: Option<f64>,
    min_confidence: Option<f64>,
    uncertain: bool,
    processing_secs: f64,
    error_message: Option<&'a str>,
    recorded_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct RunRow<'a> {
    run_id: &'a str,
    mode: &'a str,
    model_name: &'a str,
    model_version: &'a str,
    status: &'a str,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    total_items: u64,
    succeeded: u64,
    failed: u64,
    avg_processing_secs: Option<f64>,
    total_processing_secs: f64,
    avg_cpu_percent: Option<f64>,
    max_cpu_percent: Option<f64>,
    avg_memory_mb: Option<f64>,
    max_memory_mb: Option<f64>,
    error_message: Option<&'a str>,
    persisted: bool,
}

pub struct ExportedItem<'a> {
    pub run_id: &'a str,
    pub mode: RunMode,
    pub label: &'a str,
    pub image_path: &'a str,
    pub detection: Option<&'a Detection>,
    pub outcome: &'a ItemOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl CsvExporter {
    pub fn new(results_path: Option<PathBuf>, runs_path: Option<PathBuf>) -> Self {
        Self {
            results_path,
            runs_path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &ExportSettings) -> Option<Self> {
        if settings.results_csv.is_none() && settings.runs_csv.is_none() {
            return None;
        }
        Some(Self::new(settings.results_csv.clone(), settings.runs_csv.clone()))
    }

    pub fn write_item(&self, item: &ExportedItem<'_>) -> Result<()> {
        let Some(path) = &self.results_path else {
            return Ok(());
        };
        let detection = item.detection;
        let error_message = match item.outcome {
            ItemOutcome::Failed { error, .. } => Some(error.as_str()),
            ItemOutcome::Succeeded { .. } => None,
        };

        let row = ItemRow {
            run_id: item.run_id,
            mode: item.mode.as_str(),
            label: item.label,
            image_path: item.image_path,
            success: item.outcome.is_success(),
            person_count: detection.map_or(0, |d| d.count),
            confidence_scores: detection
                .map(|d| format_confidences(&d.confidences))
                .unwrap_or_default(),
            avg_confidence: detection.and_then(|d| d.avg_confidence),
            max_confidence: detection.and_then(|d| d.max_confidence),
            min_confidence: detection.and_then(|d| d.min_confidence),
            uncertain: detection.is_some_and(|d| d.uncertain),
            processing_secs: item.outcome.processing_secs(),
            error_message,
            recorded_at: item.recorded_at,
        };
        self.append(path, &row)
    }

    pub fn write_run(&self, summary: &RunSummary, identity: &DetectorIdentity) -> Result<()> {
        let Some(path) = &self.runs_path else {
            return Ok(());
        };
        let stats = &summary.stats;

        let row = RunRow {
            run_id: &summary.run_id,
            mode: summary.mode.as_str(),
            model_name: &identity.name,
            model_version: &identity.version,
            status: summary.status.as_str(),
            started_at: summary.started_at,
            ended_at: summary.ended_at,
            total_items: stats.total_items,
            succeeded: stats.succeeded,
            failed: stats.failed,
            avg_processing_secs: stats.avg_processing_secs,
            total_processing_secs: stats.total_processing_secs,
            avg_cpu_percent: stats.usage.avg_cpu_percent,
            max_cpu_percent: stats.usage.max_cpu_percent,
            avg_memory_mb: stats.usage.avg_memory_mb,
            max_memory_mb: stats.usage.max_memory_mb,
            error_message: summary.error_message.as_deref(),
            persisted: summary.persisted,
        };
        self.append(path, &row)
    }

    fn append<T: Serialize>(&self, path: &Path, row: &T) -> Result<()> {
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer
            .serialize(row)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
        writer.flush()?;
        Ok(())
    }
}
