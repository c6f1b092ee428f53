use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime, parse_source, to_i64, to_u32},
    models::{Observation, ObservationPair, Source},
};
use crate::pairing::window::pair_window;

const OBSERVATION_COLUMNS: &str = "id, run_id, source, observed_at, person_count,
    avg_confidence, max_confidence, min_confidence, raw_output, success, error_message";

fn row_to_observation(row: &Row) -> Result<Observation> {
    let source: String = row.get("source")?;
    let observed_at: String = row.get("observed_at")?;
    let raw_output: String = row.get("raw_output")?;

    Ok(Observation {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        source: parse_source(&source)?,
        observed_at: parse_datetime(&observed_at, "observed_at")?,
        person_count: to_u32(row.get("person_count")?, "person_count")?,
        avg_confidence: row.get("avg_confidence")?,
        max_confidence: row.get("max_confidence")?,
        min_confidence: row.get("min_confidence")?,
        raw_output: serde_json::from_str(&raw_output).context("failed to parse raw_output")?,
        success: row.get("success")?,
        error_message: row.get("error_message")?,
    })
}

impl Database {
    pub async fn insert_observation(&self, observation: &Observation) -> Result<i64> {
        let record = observation.clone();
        self.execute(move |conn| {
            let raw_output = serde_json::to_string(&record.raw_output)
                .context("failed to serialize raw detector output")?;

            conn.execute(
                "INSERT INTO observations (
                    run_id,
                    source,
                    observed_at,
                    person_count,
                    avg_confidence,
                    max_confidence,
                    min_confidence,
                    raw_output,
                    success,
                    error_message
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.run_id,
                    record.source.as_str(),
                    format_timestamp(&record.observed_at),
                    record.person_count,
                    record.avg_confidence,
                    record.max_confidence,
                    record.min_confidence,
                    raw_output,
                    record.success,
                    record.error_message,
                ],
            )
            .context("failed to insert observation")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_latest_observations(
        &self,
        source: Option<Source>,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| latest_observations(conn, source, limit))
            .await
    }

    pub async fn get_observations_for_run(&self, run_id: &str) -> Result<Vec<Observation>> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBSERVATION_COLUMNS}
                 FROM observations
                 WHERE run_id = ?1
                 ORDER BY observed_at ASC, id ASC"
            ))?;

            let mut rows = stmt.query(params![run_id])?;
            let mut observations = Vec::new();
            while let Some(row) = rows.next()? {
                observations.push(row_to_observation(row)?);
            }
            Ok(observations)
        })
        .await
    }

    /// Cross-source pairs from the `limit` newest observations of each source whose
    /// timestamps are at most `max_time_diff_secs` apart, closest first.
    pub async fn get_paired_observations(
        &self,
        max_time_diff_secs: f64,
        limit: usize,
    ) -> Result<Vec<ObservationPair>> {
        let per_source = to_i64(limit as u64)?;
        self.execute(move |conn| {
            // One read transaction so both windows come from the same snapshot.
            let tx = conn.transaction()?;
            let xs = latest_observations(&tx, Some(Source::X), per_source)?;
            let ys = latest_observations(&tx, Some(Source::Y), per_source)?;
            tx.commit()?;
            Ok(pair_window(&xs, &ys, max_time_diff_secs, limit))
        })
        .await
    }
}

fn latest_observations(
    conn: &Connection,
    source: Option<Source>,
    limit: i64,
) -> Result<Vec<Observation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {OBSERVATION_COLUMNS}
         FROM observations
         WHERE success = 1 AND (?1 IS NULL OR source = ?1)
         ORDER BY observed_at DESC, id DESC
         LIMIT ?2"
    ))?;

    let mut rows = stmt.query(params![source.map(|s| s.as_str()), limit])?;
    let mut observations = Vec::new();
    while let Some(row) = rows.next()? {
        observations.push(row_to_observation(row)?);
    }
    Ok(observations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn observation(source: Source, secs: i64, count: u32, confidence: f64) -> Observation {
        Observation {
            id: None,
            run_id: None,
            source,
            observed_at: Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
                + Duration::seconds(secs),
            person_count: count,
            avg_confidence: Some(confidence),
            max_confidence: Some(confidence),
            min_confidence: Some(confidence),
            raw_output: json!({ "boxes": count }),
            success: true,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn insert_returns_increasing_ids_and_roundtrips() {
        let db = Database::open_in_memory().unwrap();
        let first = db.insert_observation(&observation(Source::X, 0, 2, 0.8)).await.unwrap();
        let second = db.insert_observation(&observation(Source::Y, 1, 3, 0.7)).await.unwrap();
        assert!(second > first);

        let latest = db.get_latest_observations(None, 10).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].id, Some(second));
        assert_eq!(latest[0].source, Source::Y);
        assert_eq!(latest[0].raw_output, json!({ "boxes": 3 }));
    }

    #[tokio::test]
    async fn latest_skips_failures_and_honours_limit_per_source() {
        let db = Database::open_in_memory().unwrap();
        for secs in 0..4 {
            db.insert_observation(&observation(Source::X, secs, 1, 0.9)).await.unwrap();
        }
        let mut failed = observation(Source::X, 10, 0, 0.0);
        failed.success = false;
        failed.avg_confidence = None;
        failed.error_message = Some("backend exited with 1".into());
        db.insert_observation(&failed).await.unwrap();
        db.insert_observation(&observation(Source::Y, 2, 1, 0.9)).await.unwrap();

        let xs = db.get_latest_observations(Some(Source::X), 2).await.unwrap();
        assert_eq!(xs.len(), 2);
        assert!(xs.iter().all(|o| o.success && o.source == Source::X));
        assert!(xs[0].observed_at > xs[1].observed_at);
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_rejected_by_schema() {
        let db = Database::open_in_memory().unwrap();
        let result = db.insert_observation(&observation(Source::X, 0, 1, 1.4)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn paired_observations_are_windowed_and_sorted() {
        let db = Database::open_in_memory().unwrap();
        db.insert_observation(&observation(Source::X, 0, 3, 0.85)).await.unwrap();
        db.insert_observation(&observation(Source::Y, 3, 3, 0.82)).await.unwrap();
        db.insert_observation(&observation(Source::Y, 1, 2, 0.82)).await.unwrap();
        db.insert_observation(&observation(Source::Y, 30, 2, 0.82)).await.unwrap();

        let pairs = db.get_paired_observations(5.0, 100).await.unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].time_diff_secs, 1.0);
        assert_eq!(pairs[1].time_diff_secs, 3.0);
        assert!(pairs.iter().all(|p| p.x.source == Source::X && p.y.source == Source::Y));
    }

    #[tokio::test]
    async fn paired_window_caps_each_source_before_pairing() {
        let db = Database::open_in_memory().unwrap();
        for secs in [0, 1, 2] {
            db.insert_observation(&observation(Source::X, secs, 2, 0.9)).await.unwrap();
        }
        db.insert_observation(&observation(Source::Y, 0, 2, 0.9)).await.unwrap();
        let mut failed = observation(Source::Y, 2, 0, 0.0);
        failed.success = false;
        db.insert_observation(&failed).await.unwrap();

        // Only the two newest x rows (1s, 2s) take part; the failed y row never does.
        let pairs = db.get_paired_observations(5.0, 2).await.unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].time_diff_secs, 1.0);
        assert_eq!(pairs[1].time_diff_secs, 2.0);
        assert!(pairs.iter().all(|p| p.y.success && p.x.id.is_some()));
    }
}
