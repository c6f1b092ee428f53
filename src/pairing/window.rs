use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::db::models::{Observation, ObservationPair};

/// Absolute gap between two timestamps in fractional seconds.
pub fn time_diff_secs(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    let delta = a.signed_duration_since(b);
    match delta.num_microseconds() {
        Some(micros) => (micros as f64 / 1_000_000.0).abs(),
        None => (delta.num_milliseconds() as f64 / 1_000.0).abs(),
    }
}

/// Cross-joins the two windows and keeps pairs at most `max_time_diff_secs` apart,
/// closest first, at most `limit` of them.
///
/// An observation may appear in several pairs. Ties keep the input order, so the
/// result is deterministic for a given pair of windows.
pub fn pair_window(
    xs: &[Observation],
    ys: &[Observation],
    max_time_diff_secs: f64,
    limit: usize,
) -> Vec<ObservationPair> {
    let mut pairs: Vec<ObservationPair> = xs
        .iter()
        .flat_map(|x| {
            ys.iter().filter_map(move |y| {
                let diff = time_diff_secs(x.observed_at, y.observed_at);
                (diff <= max_time_diff_secs).then(|| ObservationPair {
                    x: x.clone(),
                    y: y.clone(),
                    time_diff_secs: diff,
                })
            })
        })
        .collect();

    pairs.sort_by(|a, b| {
        a.time_diff_secs
            .partial_cmp(&b.time_diff_secs)
            .unwrap_or(Ordering::Equal)
    });
    pairs.truncate(limit);
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Source;
    use chrono::{Duration, TimeZone};
    use serde_json::Value;

    fn at(source: Source, id: i64, millis: i64) -> Observation {
        Observation {
            id: Some(id),
            run_id: None,
            source,
            observed_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
                + Duration::milliseconds(millis),
            person_count: 1,
            avg_confidence: Some(0.9),
            max_confidence: Some(0.9),
            min_confidence: Some(0.9),
            raw_output: Value::Null,
            success: true,
            error_message: None,
        }
    }

    #[test]
    fn keeps_only_pairs_inside_window_sorted_by_gap() {
        let xs = [at(Source::X, 1, 0), at(Source::X, 2, 10_000)];
        let ys = [
            at(Source::Y, 10, 4_000),
            at(Source::Y, 11, 500),
            at(Source::Y, 12, 20_000),
        ];

        let pairs = pair_window(&xs, &ys, 5.0, 100);
        let ids: Vec<(Option<i64>, Option<i64>)> =
            pairs.iter().map(|p| (p.x.id, p.y.id)).collect();

        assert_eq!(ids, vec![(Some(1), Some(11)), (Some(1), Some(10))]);
        assert_eq!(pairs[0].time_diff_secs, 0.5);
        assert_eq!(pairs[1].time_diff_secs, 4.0);
    }

    #[test]
    fn window_edge_is_inclusive() {
        let xs = [at(Source::X, 1, 0)];
        let ys = [at(Source::Y, 2, 5_000), at(Source::Y, 3, 5_001)];
        let pairs = pair_window(&xs, &ys, 5.0, 100);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].y.id, Some(2));
    }

    #[test]
    fn observations_are_reused_across_pairs() {
        let xs = [at(Source::X, 1, 0)];
        let ys = [at(Source::Y, 2, 1_000), at(Source::Y, 3, 2_000)];
        let pairs = pair_window(&xs, &ys, 5.0, 100);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.x.id == Some(1)));
    }

    #[test]
    fn result_is_capped_at_limit() {
        let xs: Vec<_> = (0..5).map(|i| at(Source::X, i, i * 100)).collect();
        let ys: Vec<_> = (0..5).map(|i| at(Source::Y, 100 + i, i * 100)).collect();
        let pairs = pair_window(&xs, &ys, 5.0, 3);
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|p| p.time_diff_secs == 0.0));
    }

    #[test]
    fn empty_side_yields_no_pairs() {
        let xs = [at(Source::X, 1, 0)];
        assert!(pair_window(&xs, &[], 5.0, 100).is_empty());
        assert!(pair_window(&[], &xs, 5.0, 100).is_empty());
    }
}
