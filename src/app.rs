//! The main application wiring, decoupled from the entry point.

use crate::{
    aggregation::{MetricsFilter, MetricsService, MetricsSummary},
    config::Config,
    core::{ChannelSender, ExperimentSummary, NewExperiment},
    experiments::{ExperimentDetail, ExperimentService},
    runner::{ExperimentRunner, RunnerSettings},
    store::{InMemoryStore, MetricStore},
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// The assembled services sharing one store.
pub struct App {
    store: Arc<dyn MetricStore>,
    experiments: ExperimentService,
    metrics: MetricsService,
}

/// What a finished run reports.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub experiment: ExperimentDetail,
    pub summary: ExperimentSummary,
    pub metrics: MetricsSummary,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    pub fn experiments(&self) -> &ExperimentService {
        &self.experiments
    }

    pub fn metrics(&self) -> &MetricsService {
        &self.metrics
    }

    /// Creates an experiment, starts it and waits for it to finish.
    ///
    /// A run that fails after starting is still reported: its summary carries
    /// the error and the experiment ends in `FAILED`.
    pub async fn run_to_completion(&self, new: NewExperiment) -> Result<RunReport> {
        let created = self.experiments.create(new).await?;
        let dry_run = created.dry_run;
        let handle = self.experiments.start(&created.id, Some(dry_run)).await?;
        let outcome = handle.await.context("experiment task panicked")?;

        let experiment = self.experiments.get(&created.id).await?;
        let summary = match outcome {
            Ok(summary) => summary,
            Err(_) => experiment.experiment.summary.clone().unwrap_or_default(),
        };
        let metrics = self
            .metrics
            .summary(&MetricsFilter::for_experiment(created.id.clone()))
            .await?;
        info!(experiment_id = %created.id, status = ?experiment.experiment.status, "Run complete");

        Ok(RunReport {
            experiment,
            summary,
            metrics,
        })
    }
}

/// Builder for the application.
///
/// Components can be overridden, which is how tests swap in fake transports.
pub struct AppBuilder {
    config: Config,
    store_override: Option<Arc<dyn MetricStore>>,
    sender_overrides: Vec<Arc<dyn ChannelSender>>,
    simulator_overrides: Vec<Arc<dyn ChannelSender>>,
    settings_override: Option<RunnerSettings>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store_override: None,
            sender_overrides: Vec::new(),
            simulator_overrides: Vec::new(),
            settings_override: None,
        }
    }

    /// Uses `store` instead of a fresh `InMemoryStore`.
    pub fn store_override(mut self, store: Arc<dyn MetricStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    /// Replaces the configured real transport of the sender's channel.
    pub fn sender_override(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.sender_overrides.push(sender);
        self
    }

    /// Replaces the dry-run simulator of the sender's channel.
    pub fn simulator_override(mut self, simulator: Arc<dyn ChannelSender>) -> Self {
        self.simulator_overrides.push(simulator);
        self
    }

    pub fn settings_override(mut self, settings: RunnerSettings) -> Self {
        self.settings_override = Some(settings);
        self
    }

    pub fn build(self) -> Result<App> {
        let store = self
            .store_override
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));

        let mut runner = ExperimentRunner::from_config(store.clone(), self.config)?;
        for sender in self.sender_overrides {
            runner = runner.with_sender(sender);
        }
        for simulator in self.simulator_overrides {
            runner = runner.with_simulator(simulator);
        }
        if let Some(settings) = self.settings_override {
            runner = runner.with_settings(settings);
        }

        Ok(App {
            experiments: ExperimentService::new(store.clone(), Arc::new(runner)),
            metrics: MetricsService::new(store.clone()),
            store,
        })
    }
}
