//! The storage port the pipeline is written against.
//!
//! Every method is one atomic call. Callers treat an `Err` as a StorageError: they log
//! it and carry on, so an outage never changes a run's outcome.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    connection::Database,
    models::{
        CorrelatedEstimate, DetectionResult, EstimateSummary, Observation, ObservationPair, Run,
        RunStats, RunStatus, Source,
    },
};

#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn create_schema(&self) -> Result<()>;

    async fn insert_run(&self, run: &Run) -> Result<()>;

    async fn insert_result(&self, result: &DetectionResult) -> Result<i64>;

    async fn update_run_completion(
        &self,
        run_id: &str,
        stats: &RunStats,
        status: RunStatus,
        error_message: Option<&str>,
        ended_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn insert_observation(&self, observation: &Observation) -> Result<i64>;

    async fn insert_correlated_estimate(&self, estimate: &CorrelatedEstimate) -> Result<i64>;

    async fn get_latest_observations(
        &self,
        source: Option<Source>,
        limit: usize,
    ) -> Result<Vec<Observation>>;

    async fn get_paired_observations(
        &self,
        max_time_diff_secs: f64,
        limit: usize,
    ) -> Result<Vec<ObservationPair>>;

    async fn get_recent_summary(&self, since: DateTime<Utc>) -> Result<Option<EstimateSummary>>;
}

#[async_trait]
impl ResultRepository for Database {
    async fn create_schema(&self) -> Result<()> {
        Database::create_schema(self).await
    }

    async fn insert_run(&self, run: &Run) -> Result<()> {
        Database::insert_run(self, run).await
    }

    async fn insert_result(&self, result: &DetectionResult) -> Result<i64> {
        Database::insert_result(self, result).await
    }

    async fn update_run_completion(
        &self,
        run_id: &str,
        stats: &RunStats,
        status: RunStatus,
        error_message: Option<&str>,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        Database::update_run_completion(self, run_id, stats, status, error_message, ended_at).await
    }

    async fn insert_observation(&self, observation: &Observation) -> Result<i64> {
        Database::insert_observation(self, observation).await
    }

    async fn insert_correlated_estimate(&self, estimate: &CorrelatedEstimate) -> Result<i64> {
        Database::insert_correlated_estimate(self, estimate).await
    }

    async fn get_latest_observations(
        &self,
        source: Option<Source>,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        Database::get_latest_observations(self, source, limit).await
    }

    async fn get_paired_observations(
        &self,
        max_time_diff_secs: f64,
        limit: usize,
    ) -> Result<Vec<ObservationPair>> {
        Database::get_paired_observations(self, max_time_diff_secs, limit).await
    }

    async fn get_recent_summary(&self, since: DateTime<Utc>) -> Result<Option<EstimateSummary>> {
        Database::get_recent_summary(self, since).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::ResultRepository;
    use crate::db::models::{
        CorrelatedEstimate, DetectionResult, EstimateSummary, Observation, ObservationPair, Run,
        RunStats, RunStatus, Source,
    };

    /// A store that is down for writes. Reads return `pairs` unless `reads_fail` is set.
    #[derive(Default)]
    pub struct UnavailableRepository {
        pub pairs: Vec<ObservationPair>,
        pub reads_fail: bool,
        pub calls: AtomicUsize,
    }

    impl UnavailableRepository {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn touch(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }

        fn read<T>(&self, value: T) -> Result<T> {
            self.touch();
            if self.reads_fail {
                Err(anyhow!("database is unreachable"))
            } else {
                Ok(value)
            }
        }

        fn write<T>(&self) -> Result<T> {
            self.touch();
            Err(anyhow!("database is unreachable"))
        }
    }

    #[async_trait]
    impl ResultRepository for UnavailableRepository {
        async fn create_schema(&self) -> Result<()> {
            self.write()
        }

        async fn insert_run(&self, _run: &Run) -> Result<()> {
            self.write()
        }

        async fn insert_result(&self, _result: &DetectionResult) -> Result<i64> {
            self.write()
        }

        async fn update_run_completion(
            &self,
            _run_id: &str,
            _stats: &RunStats,
            _status: RunStatus,
            _error_message: Option<&str>,
            _ended_at: DateTime<Utc>,
        ) -> Result<()> {
            self.write()
        }

        async fn insert_observation(&self, _observation: &Observation) -> Result<i64> {
            self.write()
        }

        async fn insert_correlated_estimate(&self, _estimate: &CorrelatedEstimate) -> Result<i64> {
            self.write()
        }

        async fn get_latest_observations(
            &self,
            _source: Option<Source>,
            _limit: usize,
        ) -> Result<Vec<Observation>> {
            self.read(Vec::new())
        }

        async fn get_paired_observations(
            &self,
            _max_time_diff_secs: f64,
            _limit: usize,
        ) -> Result<Vec<ObservationPair>> {
            self.read(self.pairs.clone())
        }

        async fn get_recent_summary(
            &self,
            _since: DateTime<Utc>,
        ) -> Result<Option<EstimateSummary>> {
            self.read(None)
        }
    }
}
