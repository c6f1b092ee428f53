use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime, parse_optional_datetime, parse_status, to_i64, to_u64},
    models::{Run, RunStats, RunStatus},
};
use crate::metrics::ResourceUsage;

const RUN_COLUMNS: &str = "run_id, model_name, model_version, started_at, ended_at,
    total_items, succeeded_items, failed_items, avg_processing_secs, total_processing_secs,
    usage_samples, avg_cpu_percent, max_cpu_percent, avg_memory_mb, max_memory_mb,
    status, error_message, config_json";

fn row_to_run(row: &Row) -> Result<Run> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let status: String = row.get("status")?;
    let config_json: Option<String> = row.get("config_json")?;

    let config = config_json
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .context("failed to parse run config_json")?;

    Ok(Run {
        run_id: row.get("run_id")?,
        model_name: row.get("model_name")?,
        model_version: row.get("model_version")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        status: parse_status(&status)?,
        stats: RunStats {
            total_items: to_u64(row.get("total_items")?, "total_items")?,
            succeeded: to_u64(row.get("succeeded_items")?, "succeeded_items")?,
            failed: to_u64(row.get("failed_items")?, "failed_items")?,
            avg_processing_secs: row.get("avg_processing_secs")?,
            total_processing_secs: row
                .get::<_, Option<f64>>("total_processing_secs")?
                .unwrap_or(0.0),
            usage: ResourceUsage {
                sample_count: to_u64(row.get("usage_samples")?, "usage_samples")?,
                avg_cpu_percent: row.get("avg_cpu_percent")?,
                max_cpu_percent: row.get("max_cpu_percent")?,
                avg_memory_mb: row.get("avg_memory_mb")?,
                max_memory_mb: row.get("max_memory_mb")?,
            },
        },
        error_message: row.get("error_message")?,
        config,
    })
}

impl Database {
    pub async fn insert_run(&self, run: &Run) -> Result<()> {
        let record = run.clone();
        self.execute(move |conn| {
            let config_json = record
                .config
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("failed to serialize run config")?;

            conn.execute(
                "INSERT INTO runs (run_id, model_name, model_version, started_at, status, config_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.run_id,
                    record.model_name,
                    record.model_version,
                    format_timestamp(&record.started_at),
                    record.status.as_str(),
                    config_json,
                ],
            )
            .with_context(|| format!("failed to insert run {}", record.run_id))?;
            Ok(())
        })
        .await
    }

    /// Writes the terminal status and aggregates. Only a `running` row can be
    /// completed; a second completion for the same run is an error.
    pub async fn update_run_completion(
        &self,
        run_id: &str,
        stats: &RunStats,
        status: RunStatus,
        error_message: Option<&str>,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(anyhow!("run {run_id} cannot be completed as {}", status.as_str()));
        }

        let run_id = run_id.to_string();
        let stats = stats.clone();
        let error_message = error_message.map(str::to_string);
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE runs
                 SET ended_at = ?1,
                     total_items = ?2,
                     succeeded_items = ?3,
                     failed_items = ?4,
                     avg_processing_secs = ?5,
                     total_processing_secs = ?6,
                     usage_samples = ?7,
                     avg_cpu_percent = ?8,
                     max_cpu_percent = ?9,
                     avg_memory_mb = ?10,
                     max_memory_mb = ?11,
                     status = ?12,
                     error_message = ?13
                 WHERE run_id = ?14 AND status = 'running'",
                params![
                    format_timestamp(&ended_at),
                    to_i64(stats.total_items)?,
                    to_i64(stats.succeeded)?,
                    to_i64(stats.failed)?,
                    stats.avg_processing_secs,
                    stats.total_processing_secs,
                    to_i64(stats.usage.sample_count)?,
                    stats.usage.avg_cpu_percent,
                    stats.usage.max_cpu_percent,
                    stats.usage.avg_memory_mb,
                    stats.usage.max_memory_mb,
                    status.as_str(),
                    error_message,
                    run_id,
                ],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("run {run_id} is missing or already finished"));
            }
            Ok(())
        })
        .await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?1"))?;
            let mut rows = stmt.query(params![run_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_run(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Runs left in `running`, newest first. A crashed process leaves these behind.
    pub async fn get_unfinished_runs(&self) -> Result<Vec<Run>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM runs WHERE status = 'running' ORDER BY started_at DESC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut runs = Vec::new();
            while let Some(row) = rows.next()? {
                runs.push(row_to_run(row)?);
            }
            Ok(runs)
        })
        .await
    }
}
