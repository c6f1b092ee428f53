mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;
mod repository;

pub use connection::Database;
pub use models::{
    CorrelatedEstimate, Derivation, DetectionResult, EstimateSummary, EstimationMethod,
    Observation, ObservationPair, Run, RunStats, RunStatus, Source,
};
pub use repository::ResultRepository;

#[cfg(test)]
pub(crate) use repository::testing;
