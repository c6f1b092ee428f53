//! Run lifecycle: start, per-item processing, and a single terminal transition.

mod export;
mod orchestrator;
mod owner;
mod state;

pub use export::{CsvExporter, ExportedItem};
pub use orchestrator::{RunOrchestrator, WorkItem};
pub use owner::RunOwner;
pub use state::{ItemOutcome, RunEnd, RunMode, RunSummary, RunTracker};
