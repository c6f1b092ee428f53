use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{RunStats, RunStatus};
use crate::detection::DetectorIdentity;
use crate::metrics::ResourceUsage;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Batch,
    Live,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Batch => "batch",
            RunMode::Live => "live",
        }
    }
}

/// Result of processing one item. Detector failures land here, not in an `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Succeeded {
        person_count: u32,
        processing_secs: f64,
    },
    Failed {
        error: String,
        processing_secs: f64,
    },
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded { .. })
    }

    pub fn processing_secs(&self) -> f64 {
        match self {
            ItemOutcome::Succeeded {
                processing_secs, ..
            }
            | ItemOutcome::Failed {
                processing_secs, ..
            } => *processing_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunEnd {
    Completed,
    Failed(String),
    Cancelled,
}

impl RunEnd {
    pub fn status(&self) -> RunStatus {
        match self {
            RunEnd::Completed => RunStatus::Completed,
            RunEnd::Failed(_) => RunStatus::Failed,
            RunEnd::Cancelled => RunStatus::Cancelled,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            RunEnd::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// A run in the `running` state.
///
/// Only the orchestrator creates one, and finishing a run consumes it, so a run cannot
/// be finished twice.
#[derive(Debug)]
pub struct RunTracker {
    run_id: String,
    mode: RunMode,
    identity: DetectorIdentity,
    started_at: DateTime<Utc>,
    total: u64,
    succeeded: u64,
    failed: u64,
    item_secs: f64,
}

impl RunTracker {
    pub(crate) fn new(
        run_id: String,
        mode: RunMode,
        identity: DetectorIdentity,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            mode,
            identity,
            started_at,
            total: 0,
            succeeded: 0,
            failed: 0,
            item_secs: 0.0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn identity(&self) -> &DetectorIdentity {
        &self.identity
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn items_processed(&self) -> u64 {
        self.total
    }

    pub(crate) fn record(&mut self, outcome: &ItemOutcome) {
        self.total += 1;
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.item_secs += outcome.processing_secs();
    }

    /// The average is over detector time per item; the total is wall-clock time from
    /// start to `ended_at`, pauses and storage included.
    pub(crate) fn stats(&self, usage: ResourceUsage, ended_at: DateTime<Utc>) -> RunStats {
        let wall_clock = (ended_at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        RunStats {
            total_items: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            avg_processing_secs: (self.total > 0).then(|| self.item_secs / self.total as f64),
            total_processing_secs: wall_clock,
            usage,
        }
    }
}

/// The in-memory outcome of a finished run. Authoritative even when storing it failed.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub stats: RunStats,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub persisted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::Value;

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    fn tracker() -> RunTracker {
        RunTracker::new(
            "run-1".into(),
            RunMode::Batch,
            DetectorIdentity {
                name: "fake".into(),
                version: "0".into(),
                config: Value::Null,
            },
            started(),
        )
    }

    #[test]
    fn counts_outcomes_and_averages_time() {
        let mut tracker = tracker();
        tracker.record(&ItemOutcome::Succeeded {
            person_count: 3,
            processing_secs: 0.5,
        });
        tracker.record(&ItemOutcome::Failed {
            error: "boom".into(),
            processing_secs: 1.5,
        });

        // Items took 2s of detector time inside a 7.5s run.
        let ended = started() + chrono::Duration::milliseconds(7_500);
        let stats = tracker.stats(ResourceUsage::default(), ended);
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_processing_secs, 7.5);
        assert_eq!(stats.avg_processing_secs, Some(1.0));
    }

    #[test]
    fn empty_run_has_no_average() {
        let stats = tracker().stats(ResourceUsage::default(), started());
        assert_eq!(stats.total_items, 0);
        assert_eq!(stats.avg_processing_secs, None);
    }

    #[test]
    fn run_end_maps_to_terminal_status() {
        assert_eq!(RunEnd::Completed.status(), RunStatus::Completed);
        assert_eq!(RunEnd::Cancelled.status(), RunStatus::Cancelled);
        let failed = RunEnd::Failed("worker panicked".into());
        assert_eq!(failed.status(), RunStatus::Failed);
        assert_eq!(failed.error_message(), Some("worker panicked"));
        assert!(failed.status().is_terminal());
    }
}
