//! Failure taxonomy of the ingestion and run pipeline.
//!
//! Repository failures are plain `anyhow::Error`s: they are logged where they occur
//! and never change a run's outcome. User cancellation is carried by the
//! `CancellationToken` rather than an error value.

use std::path::PathBuf;

use thiserror::Error;

/// An input file that could not be read or decoded. The file stays where it is.
#[derive(Debug, Error)]
#[error("failed to decode {}: {reason}", path.display())]
pub struct DecodeError {
    pub path: PathBuf,
    pub reason: String,
}

/// A detector failure on a single item. Recorded as a failed observation; the run
/// carries on.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("detector could not read input: {0}")]
    Input(String),
    #[error("detector backend failed: {0}")]
    Backend(String),
    #[error("detector returned malformed output: {0}")]
    MalformedOutput(String),
}

/// A failure that escaped the per-item boundary. Aborts the run with status `failed`.
#[derive(Debug, Error)]
pub enum OrchestrationFault {
    #[error("detection worker aborted: {0}")]
    WorkerAborted(String),
    #[error("ingest worker aborted: {0}")]
    IngestAborted(String),
}
