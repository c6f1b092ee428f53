use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    db::{CorrelatedEstimate, EstimateSummary, ObservationPair, ResultRepository},
    events::{EventSink, PipelineEvent},
};

use super::{
    config::PairingConfig,
    estimate::{estimate_pair, passes_quality_gate, PairEstimate},
    stats::CycleStats,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Periodically turns recent cross-source observation pairs into correlated estimates.
pub struct PairingEngine {
    repository: Arc<dyn ResultRepository>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    config: PairingConfig,
}

impl PairingEngine {
    pub fn new(
        repository: Arc<dyn ResultRepository>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        config: PairingConfig,
    ) -> Self {
        Self {
            repository,
            clock,
            events,
            config,
        }
    }

    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    /// One cycle. Failing to read the window is an error; failing to store an
    /// individual estimate is logged and counted.
    pub async fn run_once(&self) -> Result<CycleStats> {
        let pairs = self
            .repository
            .get_paired_observations(self.config.max_time_diff_secs, self.config.limit)
            .await
            .context("failed to read paired observations")?;

        log_debug!("pairing cycle: {} candidate pairs", pairs.len());

        let mut unstored = 0;
        let mut discarded = 0;
        let mut saved = 0;
        let mut estimates: Vec<PairEstimate> = Vec::with_capacity(pairs.len());

        for pair in &pairs {
            let (Some(x_id), Some(y_id)) = (pair.x.id, pair.y.id) else {
                log_warn!("skipping pair of unstored observations");
                unstored += 1;
                continue;
            };
            let Some(record) = self.evaluate(pair, (x_id, y_id), &mut estimates, &mut discarded)
            else {
                continue;
            };

            match self.repository.insert_correlated_estimate(&record).await {
                Ok(id) => {
                    saved += 1;
                    log_debug!(
                        "estimate {id}: x#{} {} / y#{} {} -> {}",
                        record.source_x_id,
                        record.count_x,
                        record.source_y_id,
                        record.count_y,
                        record.estimated_count
                    );
                }
                Err(err) => log::error!(
                    "failed to store estimate for pair x#{} y#{}: {err:?}",
                    record.source_x_id,
                    record.source_y_id
                ),
            }
        }

        let stats = CycleStats::summarize(pairs.len(), unstored, discarded, saved, &estimates);
        if stats.pairs_considered == 0 {
            log_info!("pairing cycle: no pairs within {}s", self.config.max_time_diff_secs);
        } else {
            log_info!(
                "pairing cycle: {} pairs, {} below threshold, {}/{} estimates saved",
                stats.pairs_considered,
                stats.discarded_by_gate,
                stats.estimates_saved,
                estimates.len()
            );
        }
        self.events.emit(&PipelineEvent::PairingCycle(stats.clone()));

        Ok(stats)
    }

    fn evaluate(
        &self,
        pair: &ObservationPair,
        (x_id, y_id): (i64, i64),
        estimates: &mut Vec<PairEstimate>,
        discarded: &mut usize,
    ) -> Option<CorrelatedEstimate> {
        // A side without a confidence cannot pass any threshold above zero.
        let cx = pair.x.avg_confidence.unwrap_or(0.0);
        let cy = pair.y.avg_confidence.unwrap_or(0.0);
        if !passes_quality_gate(cx, cy, self.config.confidence_threshold) {
            *discarded += 1;
            return None;
        }

        let estimate = estimate_pair(
            pair.x.person_count,
            pair.y.person_count,
            cx,
            cy,
            pair.time_diff_secs,
            self.config.max_time_diff_secs,
        );

        let record = CorrelatedEstimate {
            id: None,
            source_x_id: x_id,
            source_y_id: y_id,
            count_x: pair.x.person_count,
            count_y: pair.y.person_count,
            estimated_count: estimate.estimated_count,
            confidence: estimate.confidence,
            time_diff_secs: pair.time_diff_secs,
            derivation: estimate.derivation.clone(),
            created_at: self.clock.now(),
        };
        estimates.push(estimate);
        Some(record)
    }

    /// Runs a cycle every `interval_secs` until cancelled. A failed cycle is logged and
    /// the next one runs on schedule.
    pub async fn run_continuous(&self, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    log_info!("pairing engine shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        log::error!("pairing cycle failed: {err:?}");
                    }
                }
            }
        }
    }

    pub async fn recent_summary(&self, hours: u32) -> Result<Option<EstimateSummary>> {
        let since = self.clock.now() - ChronoDuration::hours(i64::from(hours));
        self.repository.get_recent_summary(since).await
    }
}
