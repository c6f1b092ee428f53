use serde::Serialize;

use super::estimate::PairEstimate;

/// What one pairing cycle did. Reported only; estimation never reads it.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    pub pairs_considered: usize,
    /// Pairs whose observations carry no row id and so cannot be referenced.
    pub skipped_unstored: usize,
    pub discarded_by_gate: usize,
    pub estimates_saved: usize,
    pub storage_failures: usize,
    pub agreement_rate: Option<f64>,
    pub mean_difference: Option<f64>,
    pub max_difference: Option<u32>,
    pub mean_estimate: Option<f64>,
    pub min_estimate: Option<u32>,
    pub max_estimate: Option<u32>,
    pub mean_confidence: Option<f64>,
}

impl CycleStats {
    /// Distribution fields describe every estimate that passed the gate, saved or not.
    pub fn summarize(
        pairs_considered: usize,
        skipped_unstored: usize,
        discarded_by_gate: usize,
        estimates_saved: usize,
        estimates: &[PairEstimate],
    ) -> Self {
        let mut stats = Self {
            pairs_considered,
            skipped_unstored,
            discarded_by_gate,
            estimates_saved,
            storage_failures: estimates.len().saturating_sub(estimates_saved),
            ..Self::default()
        };
        if estimates.is_empty() {
            return stats;
        }

        let n = estimates.len() as f64;
        let agreements = estimates.iter().filter(|e| e.derivation.agreement).count();
        let differences = estimates.iter().map(|e| e.derivation.difference);
        let counts = estimates.iter().map(|e| e.estimated_count);

        stats.agreement_rate = Some(agreements as f64 / n);
        stats.mean_difference = Some(differences.clone().map(f64::from).sum::<f64>() / n);
        stats.max_difference = differences.max();
        stats.mean_estimate = Some(counts.clone().map(f64::from).sum::<f64>() / n);
        stats.min_estimate = counts.clone().min();
        stats.max_estimate = counts.max();
        stats.mean_confidence = Some(estimates.iter().map(|e| e.confidence).sum::<f64>() / n);
        stats
    }
}
