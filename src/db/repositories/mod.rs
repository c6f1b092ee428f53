pub mod estimates;
pub mod observations;
pub mod results;
pub mod runs;
