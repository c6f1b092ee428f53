use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime, to_u32},
    models::DetectionResult,
};

fn row_to_result(row: &Row) -> Result<DetectionResult> {
    let recorded_at: String = row.get("recorded_at")?;
    let model_output: Option<String> = row.get("model_output")?;

    Ok(DetectionResult {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        image_path: row.get("image_path")?,
        image_filename: row.get("image_filename")?,
        classification: row.get("classification")?,
        model_output: model_output
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .context("failed to parse model_output")?,
        confidence_scores: row.get("confidence_scores")?,
        processing_secs: row.get("processing_secs")?,
        success: row.get("success")?,
        error_message: row.get("error_message")?,
        person_count: to_u32(row.get("person_count")?, "person_count")?,
        avg_confidence: row.get("avg_confidence")?,
        max_confidence: row.get("max_confidence")?,
        min_confidence: row.get("min_confidence")?,
        uncertain: row.get("uncertain")?,
        recorded_at: parse_datetime(&recorded_at, "recorded_at")?,
    })
}

impl Database {
    pub async fn insert_result(&self, result: &DetectionResult) -> Result<i64> {
        let record = result.clone();
        self.execute(move |conn| {
            let model_output = record
                .model_output
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("failed to serialize model output")?;

            conn.execute(
                "INSERT INTO detection_results (
                    run_id,
                    image_path,
                    image_filename,
                    classification,
                    model_output,
                    confidence_scores,
                    processing_secs,
                    success,
                    person_count,
                    avg_confidence,
                    max_confidence,
                    min_confidence,
                    uncertain,
                    error_message,
                    recorded_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    record.run_id,
                    record.image_path,
                    record.image_filename,
                    record.classification,
                    model_output,
                    record.confidence_scores,
                    record.processing_secs,
                    record.success,
                    record.person_count,
                    record.avg_confidence,
                    record.max_confidence,
                    record.min_confidence,
                    record.uncertain,
                    record.error_message,
                    format_timestamp(&record.recorded_at),
                ],
            )
            .with_context(|| format!("failed to insert result for {}", record.image_path))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_results_for_run(&self, run_id: &str) -> Result<Vec<DetectionResult>> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, run_id, image_path, image_filename, classification, model_output,
                        confidence_scores, processing_secs, success, person_count,
                        avg_confidence, max_confidence, min_confidence, uncertain,
                        error_message, recorded_at
                 FROM detection_results
                 WHERE run_id = ?1
                 ORDER BY id ASC",
            )?;

            let mut rows = stmt.query(params![run_id])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_result(row)?);
            }
            Ok(results)
        })
        .await
    }
}
