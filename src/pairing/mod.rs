//! Time-windowed pairing of the two observation streams into occupancy estimates.

pub mod config;
pub mod engine;
pub mod estimate;
pub mod stats;
pub mod window;

pub use config::PairingConfig;
pub use engine::PairingEngine;
pub use estimate::{estimate_count, estimate_pair, PairEstimate};
pub use stats::CycleStats;
pub use window::pair_window;
