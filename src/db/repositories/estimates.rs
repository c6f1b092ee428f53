use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime, to_i64, to_u32, to_u64},
    models::{CorrelatedEstimate, EstimateSummary},
};

fn row_to_estimate(row: &Row) -> Result<CorrelatedEstimate> {
    let derivation_json: String = row.get("derivation_json")?;
    let created_at: String = row.get("created_at")?;

    Ok(CorrelatedEstimate {
        id: row.get("id")?,
        source_x_id: row.get("source_x_id")?,
        source_y_id: row.get("source_y_id")?,
        count_x: to_u32(row.get("count_x")?, "count_x")?,
        count_y: to_u32(row.get("count_y")?, "count_y")?,
        estimated_count: to_u32(row.get("estimated_count")?, "estimated_count")?,
        confidence: row.get("confidence")?,
        time_diff_secs: row.get("time_diff_secs")?,
        derivation: serde_json::from_str(&derivation_json)
            .context("failed to parse derivation_json")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

impl Database {
    pub async fn insert_correlated_estimate(&self, estimate: &CorrelatedEstimate) -> Result<i64> {
        let record = estimate.clone();
        self.execute(move |conn| {
            let derivation_json = serde_json::to_string(&record.derivation)
                .context("failed to serialize derivation")?;

            conn.execute(
                "INSERT INTO correlated_estimates (
                    source_x_id,
                    source_y_id,
                    count_x,
                    count_y,
                    estimated_count,
                    confidence,
                    time_diff_secs,
                    derivation_json,
                    created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.source_x_id,
                    record.source_y_id,
                    record.count_x,
                    record.count_y,
                    record.estimated_count,
                    record.confidence,
                    record.time_diff_secs,
                    derivation_json,
                    format_timestamp(&record.created_at),
                ],
            )
            .context("failed to insert correlated estimate")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn list_recent_estimates(&self, limit: usize) -> Result<Vec<CorrelatedEstimate>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, source_x_id, source_y_id, count_x, count_y, estimated_count,
                        confidence, time_diff_secs, derivation_json, created_at
                 FROM correlated_estimates
                 ORDER BY id DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut estimates = Vec::new();
            while let Some(row) = rows.next()? {
                estimates.push(row_to_estimate(row)?);
            }
            Ok(estimates)
        })
        .await
    }

    /// Aggregate of the estimates created at or after `since`; `None` when there are none.
    pub async fn get_recent_summary(&self, since: DateTime<Utc>) -> Result<Option<EstimateSummary>> {
        self.execute(move |conn| {
            let summary = conn.query_row(
                "SELECT COUNT(*),
                        AVG(estimated_count),
                        MIN(estimated_count),
                        MAX(estimated_count),
                        AVG(confidence),
                        AVG(time_diff_secs)
                 FROM correlated_estimates
                 WHERE created_at >= ?1",
                params![format_timestamp(&since)],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                    ))
                },
            )?;

            let (total, avg_count, min_count, max_count, avg_confidence, avg_time_diff) = summary;
            if total == 0 {
                return Ok(None);
            }

            Ok(Some(EstimateSummary {
                total: to_u64(total, "total")?,
                avg_count: avg_count.unwrap_or(0.0),
                min_count: to_u32(min_count.unwrap_or(0), "min_count")?,
                max_count: to_u32(max_count.unwrap_or(0), "max_count")?,
                avg_confidence: avg_confidence.unwrap_or(0.0),
                avg_time_diff_secs: avg_time_diff.unwrap_or(0.0),
            }))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Derivation, EstimationMethod, Observation, Source};
    use chrono::Duration;
    use serde_json::json;

    async fn seed_pair(db: &Database) -> (i64, i64) {
        let base = Observation {
            id: None,
            run_id: None,
            source: Source::X,
            observed_at: Utc::now(),
            person_count: 3,
            avg_confidence: Some(0.9),
            max_confidence: Some(0.9),
            min_confidence: Some(0.9),
            raw_output: json!(null),
            success: true,
            error_message: None,
        };
        let x = db.insert_observation(&base).await.unwrap();
        let y = db
            .insert_observation(&Observation {
                source: Source::Y,
                ..base
            })
            .await
            .unwrap();
        (x, y)
    }

    fn estimate(x: i64, y: i64, count: u32, confidence: f64, created_at: DateTime<Utc>) -> CorrelatedEstimate {
        CorrelatedEstimate {
            id: None,
            source_x_id: x,
            source_y_id: y,
            count_x: count,
            count_y: count,
            estimated_count: count,
            confidence,
            time_diff_secs: 1.0,
            derivation: Derivation {
                method: EstimationMethod::Agreement,
                weighted_count: f64::from(count),
                time_penalty: 0.8,
                x_confidence: 0.9,
                y_confidence: 0.9,
                difference: 0,
                agreement: true,
            },
            created_at,
        }
    }

    #[tokio::test]
    async fn empty_window_has_no_summary() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_recent_summary(Utc::now() - Duration::hours(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn summary_covers_only_recent_estimates() {
        let db = Database::open_in_memory().unwrap();
        let (x, y) = seed_pair(&db).await;
        let now = Utc::now();

        db.insert_correlated_estimate(&estimate(x, y, 2, 0.6, now)).await.unwrap();
        db.insert_correlated_estimate(&estimate(x, y, 4, 0.8, now)).await.unwrap();
        db.insert_correlated_estimate(&estimate(x, y, 9, 0.1, now - Duration::hours(3)))
            .await
            .unwrap();

        let summary = db
            .get_recent_summary(now - Duration::hours(1))
            .await
            .unwrap()
            .expect("two estimates in window");
        assert_eq!(summary.total, 2);
        assert_eq!(summary.min_count, 2);
        assert_eq!(summary.max_count, 4);
        assert!((summary.avg_count - 3.0).abs() < 1e-9);
        assert!((summary.avg_confidence - 0.7).abs() < 1e-9);
        assert!((summary.avg_time_diff_secs - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn derivation_roundtrips_through_json_column() {
        let db = Database::open_in_memory().unwrap();
        let (x, y) = seed_pair(&db).await;
        let original = estimate(x, y, 3, 0.7, Utc::now());
        let id = db.insert_correlated_estimate(&original).await.unwrap();

        let stored = db.list_recent_estimates(1).await.unwrap();
        assert_eq!(stored[0].id, Some(id));
        assert_eq!(stored[0].derivation, original.derivation);
    }
}
