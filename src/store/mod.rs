//! Persistence contract for experiments, metric events and series points.
//!
//! The runner, the recorder and the aggregation service only talk to the
//! `MetricStore` trait. `memory::InMemoryStore` is the bundled backend; a
//! relational backend implements the same trait and pushes `EventQuery`
//! filters down into its query language.

pub mod memory;

use crate::core::{
    Channel, ExperimentConfig, ExperimentStatus, ExperimentSummary, MetricEvent, MetricStatus,
    SeriesPoint,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::InMemoryStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// How an event update treats the stored retry counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryUpdate {
    /// Leave the stored value untouched.
    #[default]
    Keep,
    /// Overwrite with an explicit value.
    Set(u32),
    /// Add one to the stored value. Applied atomically by the store.
    Increment,
}

/// A partial update applied to every event matching a correlation id.
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPatch {
    pub status: Option<MetricStatus>,
    pub provider_ack_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<f64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry: RetryUpdate,
}

impl EventPatch {
    pub(crate) fn apply(&self, event: &mut MetricEvent) {
        if let Some(status) = self.status {
            event.status = status;
        }
        if let Some(at) = self.provider_ack_at {
            event.provider_ack_at = Some(at);
        }
        if let Some(at) = self.delivered_at {
            event.delivered_at = Some(at);
        }
        if let Some(latency) = self.latency_ms {
            event.latency_ms = Some(latency);
        }
        if let Some(code) = &self.error_code {
            event.error_code = Some(code.clone());
        }
        if let Some(message) = &self.error_message {
            event.error_message = Some(message.clone());
        }
        match self.retry {
            RetryUpdate::Keep => {}
            RetryUpdate::Set(count) => event.retry_count = count,
            RetryUpdate::Increment => event.retry_count = event.retry_count.saturating_add(1),
        }
    }
}

/// Filters for reading metric events. Empty filters match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    /// Inclusive lower bound on `sent_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `sent_at`.
    pub to: Option<DateTime<Utc>>,
    pub channel: Option<Channel>,
    pub status: Option<MetricStatus>,
    pub experiment_id: Option<String>,
    /// Case-insensitive substring match on correlation id, recipient hash or template.
    pub search: Option<String>,
    /// Only return events that carry a latency.
    pub with_latency: bool,
}

impl EventQuery {
    pub fn matches(&self, event: &MetricEvent) -> bool {
        if self.from.is_some_and(|from| event.sent_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| event.sent_at > to) {
            return false;
        }
        if self.channel.is_some_and(|channel| event.channel != channel) {
            return false;
        }
        if self.status.is_some_and(|status| event.status != status) {
            return false;
        }
        if let Some(id) = &self.experiment_id {
            if event.experiment_id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        if self.with_latency && event.latency_ms.is_none() {
            return false;
        }
        if let Some(needle) = &self.search {
            let needle = needle.to_lowercase();
            let hit = event.correlation_id.to_lowercase().contains(&needle)
                || event.recipient_hash.to_lowercase().contains(&needle)
                || event
                    .template
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Persistent storage for the experiment pipeline.
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn insert_experiment(&self, experiment: ExperimentConfig) -> Result<(), StoreError>;

    async fn get_experiment(&self, id: &str) -> Result<Option<ExperimentConfig>, StoreError>;

    /// All experiments, newest first.
    async fn list_experiments(&self) -> Result<Vec<ExperimentConfig>, StoreError>;

    /// Moves a `CREATED` experiment to `RUNNING` and stamps `started_at`.
    ///
    /// This is a compare-and-set: any other current status yields
    /// `StoreError::Conflict`, so a run can never be entered twice.
    async fn mark_running(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<ExperimentConfig, StoreError>;

    /// Writes the terminal status, finish time and summary of a run.
    async fn finish_experiment(
        &self,
        id: &str,
        status: ExperimentStatus,
        finished_at: DateTime<Utc>,
        summary: ExperimentSummary,
    ) -> Result<(), StoreError>;

    /// Deletes an experiment together with its events and series points.
    async fn delete_experiment(&self, id: &str) -> Result<(), StoreError>;

    async fn insert_event(&self, event: MetricEvent) -> Result<(), StoreError>;

    async fn get_event(&self, correlation_id: &str) -> Result<Option<MetricEvent>, StoreError>;

    /// Applies `patch` to every event with this correlation id and returns the
    /// number of rows touched. Zero matches is not an error.
    async fn update_event(&self, correlation_id: &str, patch: EventPatch)
        -> Result<u64, StoreError>;

    /// Matching events ordered by `sent_at` ascending.
    async fn find_events(&self, query: &EventQuery) -> Result<Vec<MetricEvent>, StoreError>;

    async fn count_events(&self, query: &EventQuery) -> Result<u64, StoreError>;

    /// Inserts the point, or overwrites the counters of the existing point
    /// with the same `(experiment_id, t_offset_sec)`.
    async fn upsert_series_point(&self, point: SeriesPoint) -> Result<(), StoreError>;

    /// Series points of an experiment ordered by `t_offset_sec` ascending.
    async fn series_points(&self, experiment_id: &str) -> Result<Vec<SeriesPoint>, StoreError>;
}
