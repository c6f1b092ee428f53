use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::models::format_confidences;
use crate::db::{DetectionResult, Observation, ResultRepository, Run, RunStats, RunStatus};
use crate::detection::{Detection, Detector};
use crate::error::{DetectionError, OrchestrationFault};
use crate::events::{EventSink, PipelineEvent};
use crate::ingest::{decode, CatalogItem, ImageWatcher, IngestedImage};
use crate::metrics::UsageMonitor;

use super::export::{CsvExporter, ExportedItem};
use super::owner::RunOwner;
use super::state::{ItemOutcome, RunEnd, RunMode, RunSummary, RunTracker};

#[derive(Debug)]
pub enum WorkItem {
    Batch(CatalogItem),
    Live(IngestedImage),
}

impl WorkItem {
    fn path(&self) -> &Path {
        match self {
            WorkItem::Batch(entry) => &entry.path,
            WorkItem::Live(ingested) => &ingested.path,
        }
    }
}

// Storage failures are logged and never change a run's outcome.
pub struct RunOrchestrator {
    detector: Arc<dyn Detector>,
    repository: Arc<dyn ResultRepository>,
    monitor: Arc<dyn UsageMonitor>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    exporter: Option<CsvExporter>,
}

impl RunOrchestrator {
    pub fn new(
        detector: Arc<dyn Detector>,
        repository: Arc<dyn ResultRepository>,
        monitor: Arc<dyn UsageMonitor>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            detector,
            repository,
            monitor,
            clock,
            events,
            exporter: None,
        }
    }

    pub fn with_exporter(mut self, exporter: CsvExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub async fn start_run(&self, mode: RunMode, config: Value) -> RunTracker {
        let identity = self.detector.identity();
        let run_id = Uuid::new_v4().to_string();
        let started_at = self.clock.now();
        self.monitor.reset();

        let run = Run {
            run_id: run_id.clone(),
            model_name: identity.name.clone(),
            model_version: identity.version.clone(),
            started_at,
            ended_at: None,
            status: RunStatus::Running,
            stats: RunStats::default(),
            error_message: None,
            config: Some(json!({
                "mode": mode.as_str(),
                "detector": identity.config,
                "run": config,
                "owner": RunOwner::current(),
            })),
        };
        if let Err(err) = self.repository.insert_run(&run).await {
            log::error!("failed to record start of run {run_id}: {err:?}");
        }

        log::info!(
            "{} run {run_id} started with {} {}",
            mode.as_str(),
            identity.name,
            identity.version
        );
        self.events.emit(&PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            mode,
            detector: identity.name.clone(),
            detector_version: identity.version.clone(),
        });

        RunTracker::new(run_id, mode, identity, started_at)
    }

    /// Detects, records and stores one item.
    ///
    /// A detector failure yields `ItemOutcome::Failed`. Only a fault of the worker
    /// itself is returned as an error.
    pub async fn process_item(
        &self,
        tracker: &mut RunTracker,
        item: WorkItem,
    ) -> Result<ItemOutcome, OrchestrationFault> {
        let detector = Arc::clone(&self.detector);
        let started = Instant::now();

        let (detection, item) = tokio::task::spawn_blocking(move || {
            let detection = match &item {
                WorkItem::Batch(entry) => decode(&entry.path)
                    .map_err(|err| DetectionError::Input(err.to_string()))
                    .and_then(|image| detector.detect(&image)),
                WorkItem::Live(ingested) => detector.detect(&ingested.image),
            };
            (detection, item)
        })
        .await
        .map_err(|err| OrchestrationFault::WorkerAborted(err.to_string()))?;

        let processing_secs = started.elapsed().as_secs_f64();
        self.monitor.sample();

        let outcome = match &detection {
            Ok(found) => ItemOutcome::Succeeded {
                person_count: found.count,
                processing_secs,
            },
            Err(err) => ItemOutcome::Failed {
                error: err.to_string(),
                processing_secs,
            },
        };

        let label = match &item {
            WorkItem::Batch(entry) => entry.classification.clone(),
            WorkItem::Live(ingested) => ingested.source.to_string(),
        };
        match &outcome {
            ItemOutcome::Succeeded { person_count, .. } => {
                log::debug!("[{label}] {person_count} persons in {processing_secs:.3}s")
            }
            ItemOutcome::Failed { error, .. } => log::warn!("[{label}] detection failed: {error}"),
        }

        let recorded_at = self.clock.now();
        self.store(tracker.run_id(), &item, detection.as_ref().ok(), &outcome, recorded_at)
            .await;
        if let Some(exporter) = &self.exporter {
            let image_path = item.path().display().to_string();
            let exported = ExportedItem {
                run_id: tracker.run_id(),
                mode: tracker.mode(),
                label: &label,
                image_path: &image_path,
                detection: detection.as_ref().ok(),
                outcome: &outcome,
                recorded_at,
            };
            if let Err(err) = exporter.write_item(&exported) {
                log::error!("failed to export item of run {}: {err:?}", tracker.run_id());
            }
        }
        tracker.record(&outcome);

        let (person_count, error) = match &outcome {
            ItemOutcome::Succeeded { person_count, .. } => (*person_count, None),
            ItemOutcome::Failed { error, .. } => (0, Some(error.clone())),
        };
        self.events.emit(&PipelineEvent::ItemProcessed {
            run_id: tracker.run_id().to_string(),
            label,
            success: outcome.is_success(),
            person_count,
            processing_secs,
            error,
        });

        Ok(outcome)
    }

    async fn store(
        &self,
        run_id: &str,
        item: &WorkItem,
        detection: Option<&Detection>,
        outcome: &ItemOutcome,
        recorded_at: DateTime<Utc>,
    ) {
        let error_message = match outcome {
            ItemOutcome::Failed { error, .. } => Some(error.clone()),
            ItemOutcome::Succeeded { .. } => None,
        };

        let stored = match item {
            WorkItem::Batch(entry) => {
                let result = DetectionResult {
                    id: None,
                    run_id: run_id.to_string(),
                    image_path: entry.path.display().to_string(),
                    image_filename: entry.filename.clone(),
                    classification: entry.classification.clone(),
                    model_output: detection.map(|d| d.raw_output.clone()),
                    confidence_scores: detection
                        .map(|d| format_confidences(&d.confidences))
                        .unwrap_or_default(),
                    processing_secs: outcome.processing_secs(),
                    success: outcome.is_success(),
                    error_message,
                    person_count: detection.map_or(0, |d| d.count),
                    avg_confidence: detection.and_then(|d| d.avg_confidence),
                    max_confidence: detection.and_then(|d| d.max_confidence),
                    min_confidence: detection.and_then(|d| d.min_confidence),
                    uncertain: detection.is_some_and(|d| d.uncertain),
                    recorded_at,
                };
                self.repository.insert_result(&result).await
            }
            WorkItem::Live(ingested) => {
                let observation = Observation {
                    id: None,
                    run_id: Some(run_id.to_string()),
                    source: ingested.source,
                    observed_at: recorded_at,
                    person_count: detection.map_or(0, |d| d.count),
                    avg_confidence: detection.and_then(|d| d.avg_confidence),
                    max_confidence: detection.and_then(|d| d.max_confidence),
                    min_confidence: detection.and_then(|d| d.min_confidence),
                    raw_output: detection.map_or(Value::Null, |d| d.raw_output.clone()),
                    success: outcome.is_success(),
                    error_message,
                };
                self.repository.insert_observation(&observation).await
            }
        };

        if let Err(err) = stored {
            log::error!("failed to store item of run {run_id}: {err:?}");
        }
    }

    pub async fn finish_run(&self, tracker: RunTracker, end: RunEnd) -> RunSummary {
        let status = end.status();
        let ended_at = self.clock.now();
        let stats = tracker.stats(self.monitor.summary(), ended_at);
        let run_id = tracker.run_id().to_string();

        let persisted = match self
            .repository
            .update_run_completion(&run_id, &stats, status, end.error_message(), ended_at)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                log::error!("failed to record completion of run {run_id}: {err:?}");
                false
            }
        };

        log::info!(
            "run {run_id} {}: {} items, {} succeeded, {} failed",
            status.as_str(),
            stats.total_items,
            stats.succeeded,
            stats.failed
        );
        self.events.emit(&PipelineEvent::RunFinished {
            run_id: run_id.clone(),
            status,
            total_items: stats.total_items,
            succeeded: stats.succeeded,
            failed: stats.failed,
        });

        let summary = RunSummary {
            run_id,
            mode: tracker.mode(),
            status,
            stats,
            error_message: end.error_message().map(str::to_string),
            started_at: tracker.started_at(),
            ended_at,
            persisted,
        };
        if let Some(exporter) = &self.exporter {
            if let Err(err) = exporter.write_run(&summary, tracker.identity()) {
                log::error!("failed to export run {}: {err:?}", summary.run_id);
            }
        }
        summary
    }

    pub async fn run_batch(
        &self,
        items: Vec<CatalogItem>,
        item_pause: Duration,
        config: Value,
        cancel_token: CancellationToken,
    ) -> RunSummary {
        let mut tracker = self.start_run(RunMode::Batch, config).await;
        let end = self
            .drive_batch(&mut tracker, items, item_pause, &cancel_token)
            .await;
        self.finish_run(tracker, end).await
    }

    async fn drive_batch(
        &self,
        tracker: &mut RunTracker,
        items: Vec<CatalogItem>,
        item_pause: Duration,
        cancel_token: &CancellationToken,
    ) -> RunEnd {
        let total = items.len();
        for (index, item) in items.into_iter().enumerate() {
            if cancel_token.is_cancelled() {
                return RunEnd::Cancelled;
            }
            log::debug!("[{}/{}] {}", index + 1, total, item.path.display());

            if let Err(fault) = self.process_item(tracker, WorkItem::Batch(item)).await {
                log::error!("run {} aborted: {fault}", tracker.run_id());
                return RunEnd::Failed(fault.to_string());
            }

            if index + 1 < total && !item_pause.is_zero() {
                tokio::select! {
                    _ = cancel_token.cancelled() => {}
                    _ = tokio::time::sleep(item_pause) => {}
                }
            }
        }
        RunEnd::Completed
    }

    pub async fn run_live(&self, watcher: &mut ImageWatcher, config: Value) -> RunSummary {
        let mut tracker = self.start_run(RunMode::Live, config).await;
        let end = self.drive_live(&mut tracker, watcher).await;
        self.finish_run(tracker, end).await
    }

    async fn drive_live(
        &self,
        tracker: &mut RunTracker,
        watcher: &mut ImageWatcher,
    ) -> RunEnd {
        // The watcher decides when to stop. Items it already took off disk are
        // drained before it reports cancellation.
        loop {
            let item = match watcher.next().await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    log::info!(
                        "live session {} stopping after {} items",
                        tracker.run_id(),
                        tracker.items_processed()
                    );
                    return RunEnd::Cancelled;
                }
                Err(fault) => {
                    log::error!("live session {} aborted: {fault}", tracker.run_id());
                    return RunEnd::Failed(fault.to_string());
                }
            };

            if let Err(fault) = self.process_item(tracker, WorkItem::Live(item)).await {
                log::error!("live session {} aborted: {fault}", tracker.run_id());
                return RunEnd::Failed(fault.to_string());
            }
        }
    }
}
