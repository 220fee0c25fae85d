//! # Internal Metrics Module
//!
//! Process-level counters and histograms recorded through the `metrics`
//! facade. Without an installed recorder every call is a no-op; the binary
//! installs `LoggingRecorder` when `metrics.log_metrics` is enabled.
//!
//! These are operational metrics of the tool itself. Experiment results live
//! in the `MetricStore`, not here.

pub mod logging_recorder;

use crate::config::MetricsConfig;
use crate::core::{Channel, ExperimentStatus};
use logging_recorder::LoggingRecorder;
use metrics::Unit;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

/// Registers descriptions for every metric this crate emits.
pub fn describe() {
    metrics::describe_counter!(
        "notifications_sent_total",
        Unit::Count,
        "Physical sends performed by experiments, labeled by channel and outcome."
    );
    metrics::describe_histogram!(
        "notification_latency_ms",
        Unit::Milliseconds,
        "Latency of accepted sends, labeled by channel."
    );
    metrics::describe_counter!(
        "experiments_finished_total",
        Unit::Count,
        "Experiments that reached a terminal status, labeled by status."
    );
    metrics::describe_counter!(
        "metric_recorder_errors_total",
        Unit::Count,
        "Metric event writes that failed and were dropped."
    );
}

/// Counts one physical send and, when accepted, its latency.
pub fn record_notification(channel: Channel, accepted: bool, latency_ms: Option<f64>) {
    let outcome = if accepted { "accepted" } else { "rejected" };
    metrics::counter!(
        "notifications_sent_total",
        "channel" => channel.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    if let Some(latency) = latency_ms {
        metrics::histogram!("notification_latency_ms", "channel" => channel.as_str())
            .record(latency);
    }
}

pub fn record_experiment_finished(status: ExperimentStatus) {
    let status = match status {
        ExperimentStatus::Created => "created",
        ExperimentStatus::Running => "running",
        ExperimentStatus::Done => "done",
        ExperimentStatus::Failed => "failed",
    };
    metrics::counter!("experiments_finished_total", "status" => status).increment(1);
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Installs the logging recorder as the global recorder and returns the
    /// handle of its reporting task.
    ///
    /// Returns `None` when metric logging is disabled or a global recorder is
    /// already installed.
    pub fn build(self, shutdown_rx: watch::Receiver<()>) -> Option<JoinHandle<()>> {
        if !self.config.log_metrics {
            return None;
        }

        let interval = Duration::from_secs(self.config.log_aggregation_seconds.max(1));
        let (recorder, handle) = LoggingRecorder::new(interval, shutdown_rx);
        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!("Failed to install metrics recorder: {}", e);
            handle.abort();
            return None;
        }
        describe();
        Some(handle)
    }
}
