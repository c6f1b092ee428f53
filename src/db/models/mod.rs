pub mod correlated_estimate;
pub mod detection_result;
pub mod observation;
pub mod run;

pub use correlated_estimate::{CorrelatedEstimate, Derivation, EstimateSummary, EstimationMethod};
pub use detection_result::{format_confidences, DetectionResult};
pub use observation::{Observation, ObservationPair, Source};
pub use run::{Run, RunStats, RunStatus};
