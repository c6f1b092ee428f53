//! Reconciles the two counts of a pair into one estimate.
//!
//! Everything here is a pure function of its arguments.

use crate::db::models::{Derivation, EstimationMethod};

/// Counts further apart than this are resolved by taking the larger one.
const DIVERGENCE_LIMIT: u32 = 2;
/// Confidence gap above which the more confident side wins outright.
const CONFIDENCE_GAP: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct PairEstimate {
    pub estimated_count: u32,
    pub confidence: f64,
    pub derivation: Derivation,
}

/// Both sides must reach the threshold.
pub fn passes_quality_gate(cx: f64, cy: f64, threshold: f64) -> bool {
    cx.min(cy) >= threshold
}

/// Linear decay from 1 at zero gap to 0 at the window edge.
pub fn time_penalty(time_diff_secs: f64, max_time_diff_secs: f64) -> f64 {
    if max_time_diff_secs <= 0.0 {
        return 0.0;
    }
    (1.0 - time_diff_secs.abs() / max_time_diff_secs).max(0.0)
}

fn weighted_count(x: u32, y: u32, cx: f64, cy: f64) -> f64 {
    let total = cx + cy;
    if total <= 0.0 {
        return (f64::from(x) + f64::from(y)) / 2.0;
    }
    (f64::from(x) * cx + f64::from(y) * cy) / total
}

/// First matching rule wins: agreement, sharp divergence, clear confidence winner,
/// then the confidence-weighted mean rounded half to even.
pub fn estimate_count(x: u32, y: u32, cx: f64, cy: f64) -> (u32, EstimationMethod) {
    if x == y {
        return (x, EstimationMethod::Agreement);
    }
    if x.abs_diff(y) > DIVERGENCE_LIMIT {
        return (x.max(y), EstimationMethod::DivergenceMax);
    }
    if (cx - cy).abs() > CONFIDENCE_GAP {
        let winner = if cx > cy { x } else { y };
        return (winner, EstimationMethod::ConfidenceWinner);
    }

    let rounded = weighted_count(x, y, cx, cy).round_ties_even();
    // The mean lies between x and y, so it always fits.
    (rounded as u32, EstimationMethod::WeightedAverage)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round_ties_even() / factor
}

pub fn estimate_pair(
    x: u32,
    y: u32,
    cx: f64,
    cy: f64,
    time_diff_secs: f64,
    max_time_diff_secs: f64,
) -> PairEstimate {
    let (estimated_count, method) = estimate_count(x, y, cx, cy);
    let penalty = time_penalty(time_diff_secs, max_time_diff_secs);

    PairEstimate {
        estimated_count,
        confidence: (cx + cy) / 2.0 * penalty,
        derivation: Derivation {
            method,
            weighted_count: round_to(weighted_count(x, y, cx, cy), 2),
            time_penalty: round_to(penalty, 3),
            x_confidence: round_to(cx, 3),
            y_confidence: round_to(cy, 3),
            difference: x.abs_diff(y),
            agreement: x == y,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_takes_the_shared_count() {
        assert_eq!(estimate_count(3, 3, 0.6, 0.95), (3, EstimationMethod::Agreement));
        assert_eq!(estimate_count(0, 0, 0.5, 0.5), (0, EstimationMethod::Agreement));
    }

    #[test]
    fn close_confidences_use_weighted_average() {
        // (5 * 0.78 + 4 * 0.81) / 1.59 = 4.49
        let estimate = estimate_pair(5, 4, 0.78, 0.81, 0.0, 5.0);
        assert_eq!(estimate.estimated_count, 4);
        assert_eq!(estimate.derivation.method, EstimationMethod::WeightedAverage);
        assert_eq!(estimate.derivation.weighted_count, 4.49);
        assert_eq!(estimate.derivation.difference, 1);
        assert!(!estimate.derivation.agreement);
    }

    #[test]
    fn clearly_more_confident_side_wins() {
        assert_eq!(
            estimate_count(2, 4, 0.65, 0.88),
            (4, EstimationMethod::ConfidenceWinner)
        );
        assert_eq!(
            estimate_count(2, 4, 0.95, 0.70),
            (2, EstimationMethod::ConfidenceWinner)
        );
    }

    #[test]
    fn sharp_divergence_takes_the_maximum() {
        assert_eq!(estimate_count(1, 4, 0.99, 0.51), (4, EstimationMethod::DivergenceMax));
        assert_eq!(estimate_count(9, 2, 0.6, 0.6), (9, EstimationMethod::DivergenceMax));
    }

    #[test]
    fn difference_of_two_is_not_divergence() {
        let (_, method) = estimate_count(1, 3, 0.8, 0.8);
        assert_eq!(method, EstimationMethod::WeightedAverage);
    }

    #[test]
    fn weighted_average_rounds_half_to_even() {
        assert_eq!(estimate_count(1, 2, 0.75, 0.75).0, 2);
        assert_eq!(estimate_count(2, 3, 0.75, 0.75).0, 2);
    }

    #[test]
    fn agreement_confidence_decays_with_time_gap() {
        let estimate = estimate_pair(7, 7, 0.92, 0.90, 1.0, 5.0);
        assert_eq!(estimate.estimated_count, 7);
        assert!((estimate.confidence - 0.91 * 0.8).abs() < 1e-9);
        assert_eq!(estimate.derivation.time_penalty, 0.8);
        assert!(estimate.derivation.agreement);
    }

    #[test]
    fn penalty_is_one_at_zero_gap_and_zero_at_edge() {
        assert_eq!(time_penalty(0.0, 5.0), 1.0);
        assert_eq!(time_penalty(5.0, 5.0), 0.0);
        assert_eq!(time_penalty(7.5, 5.0), 0.0);
        assert_eq!(time_penalty(2.5, 5.0), 0.5);
    }

    #[test]
    fn quality_gate_checks_weaker_side() {
        assert!(!passes_quality_gate(0.3, 0.9, 0.5));
        assert!(passes_quality_gate(0.5, 0.9, 0.5));
    }

    #[test]
    fn identical_inputs_give_identical_results() {
        let first = estimate_pair(5, 6, 0.81, 0.77, 1.3, 5.0);
        let second = estimate_pair(5, 6, 0.81, 0.77, 1.3, 5.0);
        assert_eq!(first, second);
    }

    #[test]
    fn derivation_values_are_rounded() {
        let estimate = estimate_pair(5, 4, 0.78123, 0.80987, 1.23456, 5.0);
        assert_eq!(estimate.derivation.x_confidence, 0.781);
        assert_eq!(estimate.derivation.y_confidence, 0.81);
        assert_eq!(estimate.derivation.time_penalty, 0.753);
    }
}
