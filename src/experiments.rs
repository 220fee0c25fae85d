//! Experiment management: create, list, inspect, start and delete.

use crate::core::{ExperimentConfig, ExperimentStatus, ExperimentSummary, NewExperiment, SeriesPoint};
use crate::runner::{ExperimentError, ExperimentRunner};
use crate::store::{EventQuery, MetricStore, StoreError};
use chrono::Utc;
use serde::Serialize;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};
use uuid::Uuid;

pub const TOTAL_MESSAGES_RANGE: RangeInclusive<u32> = 1..=10_000;
pub const CONCURRENCY_RANGE: RangeInclusive<u32> = 1..=100;
pub const RATE_PER_SEC_RANGE: RangeInclusive<u32> = 1..=1_000;

/// An experiment with the sizes of its recorded data.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExperimentOverview {
    #[serde(flatten)]
    pub experiment: ExperimentConfig,
    pub event_count: u64,
    pub series_point_count: u64,
}

/// An experiment with its full time series.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExperimentDetail {
    #[serde(flatten)]
    pub experiment: ExperimentConfig,
    pub event_count: u64,
    /// Ascending by offset.
    pub series: Vec<SeriesPoint>,
}

pub struct ExperimentService {
    store: Arc<dyn MetricStore>,
    runner: Arc<ExperimentRunner>,
}

impl ExperimentService {
    pub fn new(store: Arc<dyn MetricStore>, runner: Arc<ExperimentRunner>) -> Self {
        Self { store, runner }
    }

    /// Validates the parameters and stores a new `CREATED` experiment.
    pub async fn create(&self, new: NewExperiment) -> Result<ExperimentConfig, ExperimentError> {
        validate_new(&new)?;

        let experiment = ExperimentConfig {
            id: Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            description: new.description,
            scenario: new.scenario.trim().to_string(),
            channel_target: new.channel_target,
            total_messages: new.total_messages,
            concurrency: new.concurrency,
            rate_per_sec: new.rate_per_sec,
            dry_run: new.dry_run,
            created_by: new.created_by,
            status: ExperimentStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            summary: None,
        };
        self.store.insert_experiment(experiment.clone()).await?;
        info!(experiment_id = %experiment.id, name = %experiment.name, "Created experiment");
        Ok(experiment)
    }

    /// Every experiment, newest first.
    pub async fn list(&self) -> Result<Vec<ExperimentOverview>, ExperimentError> {
        let experiments = self.store.list_experiments().await?;
        let mut overviews = Vec::with_capacity(experiments.len());
        for experiment in experiments {
            let event_count = self.event_count(&experiment.id).await?;
            let series_point_count = self.store.series_points(&experiment.id).await?.len() as u64;
            overviews.push(ExperimentOverview {
                experiment,
                event_count,
                series_point_count,
            });
        }
        Ok(overviews)
    }

    pub async fn get(&self, id: &str) -> Result<ExperimentDetail, ExperimentError> {
        let experiment = self
            .store
            .get_experiment(id)
            .await?
            .ok_or_else(|| ExperimentError::NotFound(id.to_string()))?;
        let event_count = self.event_count(id).await?;
        let series = self.store.series_points(id).await?;
        Ok(ExperimentDetail {
            experiment,
            event_count,
            series,
        })
    }

    /// Starts an experiment in the background.
    ///
    /// Lookup, status and configuration errors are returned here, before the
    /// experiment becomes `RUNNING`. Anything that goes wrong afterwards is
    /// persisted on the experiment and logged; the returned handle only
    /// matters to callers that want to wait.
    /// `dry_run` defaults to the flag stored on the experiment.
    #[instrument(skip(self))]
    pub async fn start(
        &self,
        id: &str,
        dry_run: Option<bool>,
    ) -> Result<JoinHandle<Result<ExperimentSummary, ExperimentError>>, ExperimentError> {
        let stored_flag = self
            .store
            .get_experiment(id)
            .await?
            .map(|e| e.dry_run)
            .ok_or_else(|| ExperimentError::NotFound(id.to_string()))?;
        let dry_run = dry_run.unwrap_or(stored_flag);

        let running = self.runner.begin(id, dry_run).await.inspect_err(|e| {
            error!(error = %e, "Experiment could not be started");
        })?;

        let runner = self.runner.clone();
        let id = id.to_string();
        Ok(tokio::spawn(async move {
            let result = runner.execute(running, dry_run).await;
            if let Err(e) = &result {
                error!(experiment_id = %id, error = %e, "Experiment run failed");
            }
            result
        }))
    }

    /// Deletes an experiment with its events and series points. Running
    /// experiments cannot be deleted.
    pub async fn delete(&self, id: &str) -> Result<(), ExperimentError> {
        let experiment = self
            .store
            .get_experiment(id)
            .await?
            .ok_or_else(|| ExperimentError::NotFound(id.to_string()))?;
        if experiment.status == ExperimentStatus::Running {
            return Err(ExperimentError::AlreadyRunning(id.to_string()));
        }

        self.store.delete_experiment(id).await.map_err(|e| match e {
            StoreError::NotFound(_) => ExperimentError::NotFound(id.to_string()),
            StoreError::Conflict(_) => ExperimentError::AlreadyRunning(id.to_string()),
            other => ExperimentError::Store(other),
        })?;
        info!(experiment_id = %id, name = %experiment.name, "Deleted experiment");
        Ok(())
    }

    async fn event_count(&self, id: &str) -> Result<u64, StoreError> {
        let query = EventQuery {
            experiment_id: Some(id.to_string()),
            ..Default::default()
        };
        self.store.count_events(&query).await
    }
}

fn validate_new(new: &NewExperiment) -> Result<(), ExperimentError> {
    if new.name.trim().is_empty() {
        return Err(ExperimentError::InvalidConfig("name must not be blank".to_string()));
    }
    if new.scenario.trim().is_empty() {
        return Err(ExperimentError::InvalidConfig(
            "scenario must not be blank".to_string(),
        ));
    }
    check_range("total_messages", new.total_messages, &TOTAL_MESSAGES_RANGE)?;
    check_range("concurrency", new.concurrency, &CONCURRENCY_RANGE)?;
    if let Some(rate) = new.rate_per_sec {
        check_range("rate_per_sec", rate, &RATE_PER_SEC_RANGE)?;
    }
    Ok(())
}

fn check_range(field: &str, value: u32, range: &RangeInclusive<u32>) -> Result<(), ExperimentError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ExperimentError::InvalidConfig(format!(
            "{} must be between {} and {}, got {}",
            field,
            range.start(),
            range.end(),
            value
        )))
    }
}
