#![allow(dead_code)]
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notifybench::core::{
    ExperimentConfig, ExperimentStatus, ExperimentSummary, MetricEvent, SeriesPoint,
};
use notifybench::store::{EventPatch, EventQuery, InMemoryStore, MetricStore, StoreError};

/// An in-memory store whose metric-event writes always fail.
///
/// Experiment and series operations behave normally, which isolates the
/// recorder's handling of persistence errors.
#[derive(Default)]
pub struct FailingEventStore {
    inner: InMemoryStore,
}

impl FailingEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn failure() -> StoreError {
        StoreError::Backend("event table unavailable".to_string())
    }
}

#[async_trait]
impl MetricStore for FailingEventStore {
    async fn insert_experiment(&self, experiment: ExperimentConfig) -> Result<(), StoreError> {
        self.inner.insert_experiment(experiment).await
    }

    async fn get_experiment(&self, id: &str) -> Result<Option<ExperimentConfig>, StoreError> {
        self.inner.get_experiment(id).await
    }

    async fn list_experiments(&self) -> Result<Vec<ExperimentConfig>, StoreError> {
        self.inner.list_experiments().await
    }

    async fn mark_running(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<ExperimentConfig, StoreError> {
        self.inner.mark_running(id, started_at).await
    }

    async fn finish_experiment(
        &self,
        id: &str,
        status: ExperimentStatus,
        finished_at: DateTime<Utc>,
        summary: ExperimentSummary,
    ) -> Result<(), StoreError> {
        self.inner
            .finish_experiment(id, status, finished_at, summary)
            .await
    }

    async fn delete_experiment(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete_experiment(id).await
    }

    async fn insert_event(&self, _event: MetricEvent) -> Result<(), StoreError> {
        Err(Self::failure())
    }

    async fn get_event(&self, _correlation_id: &str) -> Result<Option<MetricEvent>, StoreError> {
        Err(Self::failure())
    }

    async fn update_event(
        &self,
        _correlation_id: &str,
        _patch: EventPatch,
    ) -> Result<u64, StoreError> {
        Err(Self::failure())
    }

    async fn find_events(&self, query: &EventQuery) -> Result<Vec<MetricEvent>, StoreError> {
        self.inner.find_events(query).await
    }

    async fn count_events(&self, query: &EventQuery) -> Result<u64, StoreError> {
        self.inner.count_events(query).await
    }

    async fn upsert_series_point(&self, point: SeriesPoint) -> Result<(), StoreError> {
        self.inner.upsert_series_point(point).await
    }

    async fn series_points(&self, experiment_id: &str) -> Result<Vec<SeriesPoint>, StoreError> {
        self.inner.series_points(experiment_id).await
    }
}

/// An in-memory store that can fail the writes that close an experiment.
///
/// `fail_series` breaks every series-point upsert. `fail_done` rejects only
/// the `DONE` transition, so a later `FAILED` write still lands.
#[derive(Default)]
pub struct FailingRunStore {
    pub inner: InMemoryStore,
    pub fail_series: bool,
    pub fail_done: bool,
}

impl FailingRunStore {
    fn failure() -> StoreError {
        StoreError::Backend("run table unavailable".to_string())
    }
}

#[async_trait]
impl MetricStore for FailingRunStore {
    async fn insert_experiment(&self, experiment: ExperimentConfig) -> Result<(), StoreError> {
        self.inner.insert_experiment(experiment).await
    }

    async fn get_experiment(&self, id: &str) -> Result<Option<ExperimentConfig>, StoreError> {
        self.inner.get_experiment(id).await
    }

    async fn list_experiments(&self) -> Result<Vec<ExperimentConfig>, StoreError> {
        self.inner.list_experiments().await
    }

    async fn mark_running(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<ExperimentConfig, StoreError> {
        self.inner.mark_running(id, started_at).await
    }

    async fn finish_experiment(
        &self,
        id: &str,
        status: ExperimentStatus,
        finished_at: DateTime<Utc>,
        summary: ExperimentSummary,
    ) -> Result<(), StoreError> {
        if self.fail_done && status == ExperimentStatus::Done {
            return Err(Self::failure());
        }
        self.inner
            .finish_experiment(id, status, finished_at, summary)
            .await
    }

    async fn delete_experiment(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete_experiment(id).await
    }

    async fn insert_event(&self, event: MetricEvent) -> Result<(), StoreError> {
        self.inner.insert_event(event).await
    }

    async fn get_event(&self, correlation_id: &str) -> Result<Option<MetricEvent>, StoreError> {
        self.inner.get_event(correlation_id).await
    }

    async fn update_event(&self, correlation_id: &str, patch: EventPatch) -> Result<u64, StoreError> {
        self.inner.update_event(correlation_id, patch).await
    }

    async fn find_events(&self, query: &EventQuery) -> Result<Vec<MetricEvent>, StoreError> {
        self.inner.find_events(query).await
    }

    async fn count_events(&self, query: &EventQuery) -> Result<u64, StoreError> {
        self.inner.count_events(query).await
    }

    async fn upsert_series_point(&self, point: SeriesPoint) -> Result<(), StoreError> {
        if self.fail_series {
            return Err(Self::failure());
        }
        self.inner.upsert_series_point(point).await
    }

    async fn series_points(&self, experiment_id: &str) -> Result<Vec<SeriesPoint>, StoreError> {
        self.inner.series_points(experiment_id).await
    }
}
