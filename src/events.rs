//! Structured pipeline events.
//!
//! The orchestrator and the pairing engine report progress as [`PipelineEvent`]s
//! through an [`EventSink`]. Where the events end up is the sink's business.

use std::path::PathBuf;

use serde::Serialize;

use crate::db::models::RunStatus;
use crate::pairing::CycleStats;
use crate::runs::RunMode;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        mode: RunMode,
        detector: String,
        detector_version: String,
    },
    ItemProcessed {
        run_id: String,
        /// Source tag in live mode, classification in batch mode.
        label: String,
        success: bool,
        person_count: u32,
        processing_secs: f64,
        error: Option<String>,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
        total_items: u64,
        succeeded: u64,
        failed: u64,
    },
    PairingCycle(CycleStats),
    InputRejected {
        path: PathBuf,
        reason: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Writes each event as one JSON line on the `headcount::events` log target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: &PipelineEvent) {
        match serde_json::to_string(event) {
            Ok(line) => log::info!(target: "headcount::events", "{line}"),
            Err(err) => log::warn!("failed to serialize pipeline event: {err}"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: &PipelineEvent) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{EventSink, PipelineEvent};

    /// Keeps every emitted event for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<PipelineEvent>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<PipelineEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &PipelineEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
