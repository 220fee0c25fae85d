//! Experiment Runner.
//!
//! Executes the logical messages of an experiment under a concurrency bound
//! and a target rate, records a metric event for every physical send, writes
//! cumulative series points while running and persists the final summary.

use crate::channels::{hash_recipient, HttpEmailSender, SimulatedSender, TelegramSender};
use crate::config::{Config, RunnerConfig};
use crate::core::{
    Channel, ChannelSender, ExperimentConfig, ExperimentStatus, ExperimentSummary, SendOutcome,
    SeriesPoint,
};
use crate::formatting::formatter_for;
use crate::internal_metrics;
use crate::recorder::{AckUpdate, MetricsRecorder, PendingEvent};
use crate::stats::{latency_stats, percentile, success_rate};
use crate::store::{MetricStore, StoreError};
use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("experiment not found: {0}")]
    NotFound(String),

    #[error("experiment {0} is already running")]
    AlreadyRunning(String),

    #[error("experiment {0} has already finished")]
    AlreadyFinished(String),

    #[error("invalid experiment: {0}")]
    InvalidConfig(String),

    #[error("missing required configuration: {}", .0.join(", "))]
    MissingConfiguration(Vec<String>),

    #[error("experiment exceeded its time limit of {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Timing knobs of the runner.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    /// Wall-clock ceiling for a whole run.
    pub timeout: Duration,
    /// Minimum spacing between two series points.
    pub series_interval: Duration,
    /// Rate used when an experiment has none.
    pub default_rate_per_sec: u32,
}

impl From<&RunnerConfig> for RunnerSettings {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            timeout: config.timeout(),
            series_interval: config.series_interval(),
            default_rate_per_sec: config.default_rate_per_sec,
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from(&RunnerConfig::default())
    }
}

/// Outcome of one physical send.
#[derive(Debug, Clone, Copy)]
struct Attempt {
    success: bool,
    latency_ms: Option<f64>,
}

impl Attempt {
    fn failed() -> Self {
        Self {
            success: false,
            latency_ms: None,
        }
    }
}

/// Counters shared by the concurrent tasks of one run.
struct Tally {
    sent: u64,
    success: u64,
    failed: u64,
    latencies: Vec<f64>,
    last_point: Instant,
}

impl Tally {
    fn new(now: Instant) -> Self {
        Self {
            sent: 0,
            success: 0,
            failed: 0,
            latencies: Vec::new(),
            last_point: now,
        }
    }

    fn record(&mut self, attempt: Attempt) {
        self.sent += 1;
        if attempt.success {
            self.success += 1;
            if let Some(latency) = attempt.latency_ms {
                self.latencies.push(latency);
            }
        } else {
            self.failed += 1;
        }
    }

    fn point(&self, experiment_id: &str, t_offset_sec: u64) -> SeriesPoint {
        SeriesPoint {
            experiment_id: experiment_id.to_string(),
            t_offset_sec,
            sent_count: self.sent,
            success_count: self.success,
            fail_count: self.failed,
            p95_latency_ms: percentile(&self.latencies, 0.95),
        }
    }

    fn summary(&self, elapsed: Duration, rate_per_sec: u32) -> ExperimentSummary {
        let stats = latency_stats(&self.latencies);
        let duration_sec = elapsed.as_secs_f64();
        ExperimentSummary {
            total_sent: self.sent,
            total_success: self.success,
            total_failed: self.failed,
            success_rate: success_rate(self.success, self.sent),
            p50_latency_ms: stats.map(|s| s.p50),
            p95_latency_ms: stats.map(|s| s.p95),
            p99_latency_ms: stats.map(|s| s.p99),
            avg_latency_ms: stats.map(|s| s.avg),
            duration_ms: elapsed.as_millis() as u64,
            duration_sec,
            throughput: if duration_sec > 0.0 {
                self.sent as f64 / duration_sec
            } else {
                0.0
            },
            peak_throughput: rate_per_sec as f64,
            error: None,
        }
    }
}

/// State of one run, borrowed by every task.
struct Run<'a> {
    experiment: &'a ExperimentConfig,
    dry_run: bool,
    started: Instant,
    tally: Mutex<Tally>,
}

impl Run<'_> {
    fn tally(&self) -> MutexGuard<'_, Tally> {
        self.tally.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs experiments against real or simulated channel transports.
#[derive(Clone)]
pub struct ExperimentRunner {
    store: Arc<dyn MetricStore>,
    recorder: MetricsRecorder,
    config: Config,
    settings: RunnerSettings,
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
    simulators: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl ExperimentRunner {
    /// A runner with no real transports and the default dry-run simulators.
    pub fn new(store: Arc<dyn MetricStore>, config: Config) -> Self {
        let simulators = [Channel::Email, Channel::Telegram]
            .into_iter()
            .map(|channel| {
                let sender: Arc<dyn ChannelSender> = Arc::new(SimulatedSender::for_channel(channel));
                (channel, sender)
            })
            .collect();
        Self {
            recorder: MetricsRecorder::new(store.clone()),
            settings: RunnerSettings::from(&config.runner),
            store,
            config,
            senders: HashMap::new(),
            simulators,
        }
    }

    /// A runner with the real transports the configuration describes.
    pub fn from_config(store: Arc<dyn MetricStore>, config: Config) -> anyhow::Result<Self> {
        let email = HttpEmailSender::from_config(&config.email)?;
        let telegram = TelegramSender::from_config(&config.telegram)?;
        let mut runner = Self::new(store, config);
        if let Some(sender) = email {
            runner = runner.with_sender(Arc::new(sender));
        }
        if let Some(sender) = telegram {
            runner = runner.with_sender(Arc::new(sender));
        }
        Ok(runner)
    }

    /// Registers the real transport for `sender.channel()`.
    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    /// Replaces the dry-run simulator for `simulator.channel()`.
    pub fn with_simulator(mut self, simulator: Arc<dyn ChannelSender>) -> Self {
        self.simulators.insert(simulator.channel(), simulator);
        self
    }

    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Checks that every configuration key the experiment's channels need is
    /// set. Dry runs need none.
    pub fn validate(
        &self,
        experiment: &ExperimentConfig,
        dry_run: bool,
    ) -> Result<(), ExperimentError> {
        if dry_run {
            return Ok(());
        }
        let missing = self.config.missing_keys(experiment.channel_target);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExperimentError::MissingConfiguration(missing))
        }
    }

    /// Validates a `CREATED` experiment and moves it to `RUNNING`.
    ///
    /// Nothing is written when validation fails, so the caller can fix the
    /// configuration and try again.
    pub async fn begin(&self, id: &str, dry_run: bool) -> Result<ExperimentConfig, ExperimentError> {
        let experiment = self
            .store
            .get_experiment(id)
            .await?
            .ok_or_else(|| ExperimentError::NotFound(id.to_string()))?;
        if experiment.status.is_terminal() {
            return Err(ExperimentError::AlreadyFinished(id.to_string()));
        }
        if experiment.status == ExperimentStatus::Running {
            return Err(ExperimentError::AlreadyRunning(id.to_string()));
        }

        self.validate(&experiment, dry_run)?;

        self.store
            .mark_running(id, Utc::now())
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => ExperimentError::NotFound(id.to_string()),
                StoreError::Conflict(_) => ExperimentError::AlreadyRunning(id.to_string()),
                other => ExperimentError::Store(other),
            })
    }

    /// Validates, starts and executes an experiment, returning once it has
    /// finished.
    pub async fn run_experiment(
        &self,
        experiment: &ExperimentConfig,
        dry_run: bool,
    ) -> Result<ExperimentSummary, ExperimentError> {
        let running = self.begin(&experiment.id, dry_run).await?;
        self.execute(running, dry_run).await
    }

    /// Executes an experiment that `begin` has already marked `RUNNING`.
    ///
    /// The experiment always ends in `DONE` or `FAILED`. On failure the partial
    /// summary carries the error message and the error is returned as well.
    #[instrument(skip_all, fields(experiment_id = %experiment.id))]
    pub async fn execute(
        &self,
        experiment: ExperimentConfig,
        dry_run: bool,
    ) -> Result<ExperimentSummary, ExperimentError> {
        let rate = experiment
            .rate_per_sec
            .unwrap_or(self.settings.default_rate_per_sec)
            .max(1);
        let started = Instant::now();
        let run = Run {
            experiment: &experiment,
            dry_run,
            started,
            tally: Mutex::new(Tally::new(started)),
        };

        info!(
            name = %experiment.name,
            channel_target = ?experiment.channel_target,
            total_messages = experiment.total_messages,
            concurrency = experiment.concurrency,
            rate_per_sec = rate,
            dry_run,
            "Starting experiment"
        );

        let outcome = match tokio::time::timeout(self.settings.timeout, self.dispatch_all(&run, rate))
            .await
        {
            Ok(()) => self.force_series_point(&run).await.map_err(ExperimentError::from),
            Err(_) => Err(ExperimentError::Timeout(self.settings.timeout)),
        };

        if matches!(outcome, Err(ExperimentError::Timeout(_))) {
            let abandoned = self
                .recorder
                .fail_pending(&experiment.id, "TIMEOUT", "experiment time limit reached")
                .await;
            if abandoned > 0 {
                warn!(abandoned, "Marked in-flight sends as failed");
            }
        }

        let mut summary = run.tally().summary(started.elapsed(), rate);
        let outcome = match outcome {
            Ok(()) => self
                .store
                .finish_experiment(
                    &experiment.id,
                    ExperimentStatus::Done,
                    Utc::now(),
                    summary.clone(),
                )
                .await
                .map_err(ExperimentError::from),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => {
                internal_metrics::record_experiment_finished(ExperimentStatus::Done);
                info!(
                    total_sent = summary.total_sent,
                    success_rate = summary.success_rate,
                    duration_ms = summary.duration_ms,
                    "Experiment finished"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(error = %e, "Experiment failed");
                summary.error = Some(e.to_string());
                if let Err(store_err) = self
                    .store
                    .finish_experiment(&experiment.id, ExperimentStatus::Failed, Utc::now(), summary)
                    .await
                {
                    error!(error = %store_err, "Could not persist failed experiment");
                }
                internal_metrics::record_experiment_finished(ExperimentStatus::Failed);
                Err(e)
            }
        }
    }

    async fn dispatch_all(&self, run: &Run<'_>, rate: u32) {
        let total = run.experiment.total_messages;
        let concurrency = run.experiment.concurrency.max(1) as usize;
        let pacing = Duration::from_secs_f64(1.0 / rate as f64);

        stream::iter(0..total)
            .for_each_concurrent(concurrency, |index| async move {
                self.send_logical(run, index).await;
                if index + 1 < total {
                    tokio::time::sleep(pacing).await;
                }
            })
            .await;
    }

    /// Sends one logical message on every channel of the target, concurrently.
    async fn send_logical(&self, run: &Run<'_>, index: u32) {
        let channels = run.experiment.channel_target.channels();
        let attempts = join_all(
            channels
                .iter()
                .map(|&channel| self.send_physical(run, index, channel)),
        )
        .await;

        let due = {
            let mut tally = run.tally();
            for attempt in attempts {
                tally.record(attempt);
            }
            let now = Instant::now();
            if now.duration_since(tally.last_point) >= self.settings.series_interval {
                tally.last_point = now;
                Some(tally.point(&run.experiment.id, offset_secs(run.started, now)))
            } else {
                None
            }
        };

        if let Some(point) = due {
            if let Err(e) = self.store.upsert_series_point(point).await {
                warn!(error = %e, "Failed to write series point");
            }
        }
    }

    async fn send_physical(&self, run: &Run<'_>, index: u32, channel: Channel) -> Attempt {
        let experiment = run.experiment;
        let correlation_id = self
            .recorder
            .record_pending(PendingEvent {
                channel,
                template: Some(format!("experiment-{}", experiment.scenario)),
                recipient_hash: hash_recipient(&format!("test-{}-{}", experiment.id, index)),
                experiment_id: Some(experiment.id.clone()),
                correlation_id: None,
            })
            .await;

        let route = if run.dry_run {
            self.simulators
                .get(&channel)
                .map(|sender| (sender, "dry-run"))
        } else {
            self.senders
                .get(&channel)
                .zip(self.config.destination(channel))
        };
        let Some((sender, recipient)) = route else {
            let code = format!("{}_CONFIG_ERROR", channel);
            let message = format!("no destination or transport configured for {}", channel);
            warn!(%channel, index, "{}", message);
            self.recorder
                .update_to_failed(&correlation_id, &code, &message, None)
                .await;
            internal_metrics::record_notification(channel, false, None);
            return Attempt::failed();
        };

        let message = formatter_for(channel).format_message(experiment, index);
        let sent = Instant::now();
        match sender.send(recipient, &message).await {
            SendOutcome::Accepted {
                message_id,
                latency_ms,
            } => {
                let latency = latency_ms.unwrap_or_else(|| sent.elapsed().as_secs_f64() * 1000.0);
                debug!(%channel, index, %message_id, latency_ms = latency, "Message accepted");
                self.recorder
                    .update_to_acked(AckUpdate {
                        correlation_id,
                        provider_ack_at: Some(Utc::now()),
                        latency_ms: Some(latency),
                        retry_count: None,
                    })
                    .await;
                internal_metrics::record_notification(channel, true, Some(latency));
                Attempt {
                    success: true,
                    latency_ms: Some(latency),
                }
            }
            SendOutcome::Rejected { code, message } => {
                debug!(%channel, index, %code, "Message rejected");
                self.recorder
                    .update_to_failed(&correlation_id, &code, &message, None)
                    .await;
                internal_metrics::record_notification(channel, false, None);
                Attempt::failed()
            }
        }
    }

    async fn force_series_point(&self, run: &Run<'_>) -> Result<(), StoreError> {
        let point = {
            let mut tally = run.tally();
            let now = Instant::now();
            tally.last_point = now;
            tally.point(&run.experiment.id, offset_secs(run.started, now))
        };
        self.store.upsert_series_point(point).await
    }
}

fn offset_secs(started: Instant, now: Instant) -> u64 {
    now.duration_since(started).as_secs()
}
