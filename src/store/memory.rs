//! In-memory `MetricStore` backend.

use crate::core::{
    ExperimentConfig, ExperimentStatus, ExperimentSummary, MetricEvent, SeriesPoint,
};
use crate::store::{EventPatch, EventQuery, MetricStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    experiments: HashMap<String, ExperimentConfig>,
    events: HashMap<String, MetricEvent>,
    series: HashMap<String, BTreeMap<u64, SeriesPoint>>,
}

/// A `MetricStore` that keeps every table in process memory.
///
/// All tables sit behind a single lock, which makes the cascade delete, the
/// `RUNNING` compare-and-set, the retry-count increment and the series upsert
/// atomic with respect to each other. State is lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl MetricStore for InMemoryStore {
    async fn insert_experiment(&self, experiment: ExperimentConfig) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.experiments.contains_key(&experiment.id) {
            return Err(StoreError::Conflict(format!(
                "experiment {} already exists",
                experiment.id
            )));
        }
        tables.experiments.insert(experiment.id.clone(), experiment);
        Ok(())
    }

    async fn get_experiment(&self, id: &str) -> Result<Option<ExperimentConfig>, StoreError> {
        Ok(self.read()?.experiments.get(id).cloned())
    }

    async fn list_experiments(&self) -> Result<Vec<ExperimentConfig>, StoreError> {
        let mut experiments: Vec<_> = self.read()?.experiments.values().cloned().collect();
        experiments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(experiments)
    }

    async fn mark_running(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<ExperimentConfig, StoreError> {
        let mut tables = self.write()?;
        let experiment = tables
            .experiments
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("experiment {}", id)))?;
        if experiment.status != ExperimentStatus::Created {
            return Err(StoreError::Conflict(format!(
                "experiment {} is {:?}, expected Created",
                id, experiment.status
            )));
        }
        experiment.status = ExperimentStatus::Running;
        experiment.started_at = Some(started_at);
        Ok(experiment.clone())
    }

    async fn finish_experiment(
        &self,
        id: &str,
        status: ExperimentStatus,
        finished_at: DateTime<Utc>,
        summary: ExperimentSummary,
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let experiment = tables
            .experiments
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("experiment {}", id)))?;
        experiment.status = status;
        experiment.finished_at = Some(finished_at);
        experiment.summary = Some(summary);
        Ok(())
    }

    async fn delete_experiment(&self, id: &str) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        match tables.experiments.get(id) {
            None => return Err(StoreError::NotFound(format!("experiment {}", id))),
            Some(experiment) if experiment.status == ExperimentStatus::Running => {
                return Err(StoreError::Conflict(format!(
                    "experiment {} is running",
                    id
                )));
            }
            Some(_) => {}
        }
        tables
            .events
            .retain(|_, event| event.experiment_id.as_deref() != Some(id));
        tables.series.remove(id);
        tables.experiments.remove(id);
        Ok(())
    }

    async fn insert_event(&self, event: MetricEvent) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.events.contains_key(&event.correlation_id) {
            return Err(StoreError::Conflict(format!(
                "correlation id {} already recorded",
                event.correlation_id
            )));
        }
        tables.events.insert(event.correlation_id.clone(), event);
        Ok(())
    }

    async fn get_event(&self, correlation_id: &str) -> Result<Option<MetricEvent>, StoreError> {
        Ok(self.read()?.events.get(correlation_id).cloned())
    }

    async fn update_event(
        &self,
        correlation_id: &str,
        patch: EventPatch,
    ) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        match tables.events.get_mut(correlation_id) {
            Some(event) => {
                patch.apply(event);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find_events(&self, query: &EventQuery) -> Result<Vec<MetricEvent>, StoreError> {
        let mut events: Vec<_> = self
            .read()?
            .events
            .values()
            .filter(|event| query.matches(event))
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.sent_at
                .cmp(&b.sent_at)
                .then_with(|| a.correlation_id.cmp(&b.correlation_id))
        });
        Ok(events)
    }

    async fn count_events(&self, query: &EventQuery) -> Result<u64, StoreError> {
        let count = self
            .read()?
            .events
            .values()
            .filter(|event| query.matches(event))
            .count();
        Ok(count as u64)
    }

    async fn upsert_series_point(&self, point: SeriesPoint) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables
            .series
            .entry(point.experiment_id.clone())
            .or_default()
            .insert(point.t_offset_sec, point);
        Ok(())
    }

    async fn series_points(&self, experiment_id: &str) -> Result<Vec<SeriesPoint>, StoreError> {
        Ok(self
            .read()?
            .series
            .get(experiment_id)
            .map(|points| points.values().cloned().collect())
            .unwrap_or_default())
    }
}
