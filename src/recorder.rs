//! Metric Event Recorder.
//!
//! The recorder owns the lifecycle of every `MetricEvent`:
//! `PENDING -> SENT -> ACKED -> DELIVERED`, with `FAILED` reachable from any
//! non-terminal state. Persistence failures are logged and swallowed so that
//! losing a metric can never block or fail a delivery attempt.

use crate::core::{Channel, MetricEvent, MetricStatus};
use crate::store::{EventPatch, EventQuery, MetricStore, RetryUpdate, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// The data needed to open a new event in `PENDING`.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub channel: Channel,
    pub template: Option<String>,
    pub recipient_hash: String,
    pub experiment_id: Option<String>,
    /// Generated when not supplied.
    pub correlation_id: Option<String>,
}

/// A provider acknowledgement.
#[derive(Debug, Clone, Default)]
pub struct AckUpdate {
    pub correlation_id: String,
    /// Defaults to now.
    pub provider_ack_at: Option<DateTime<Utc>>,
    /// Derived from the stored `sent_at` when omitted.
    pub latency_ms: Option<f64>,
    pub retry_count: Option<u32>,
}

/// Records metric events through a `MetricStore`.
#[derive(Clone)]
pub struct MetricsRecorder {
    store: Arc<dyn MetricStore>,
}

impl MetricsRecorder {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }

    /// Persists a `PENDING` event stamped with `sent_at = now` and returns its
    /// correlation id. The id is returned even if the write failed.
    #[instrument(skip_all, fields(channel = %pending.channel))]
    pub async fn record_pending(&self, pending: PendingEvent) -> String {
        let correlation_id = pending
            .correlation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let event = MetricEvent {
            correlation_id: correlation_id.clone(),
            channel: pending.channel,
            template: pending.template,
            recipient_hash: pending.recipient_hash,
            status: MetricStatus::Pending,
            sent_at: Utc::now(),
            provider_ack_at: None,
            delivered_at: None,
            latency_ms: None,
            error_code: None,
            error_message: None,
            retry_count: 0,
            experiment_id: pending.experiment_id,
        };

        if let Err(e) = self.store.insert_event(event).await {
            report("record_pending", &correlation_id, &e);
        }
        correlation_id
    }

    /// Marks an event as handed to the provider, before any acknowledgement.
    pub async fn update_to_sent(&self, correlation_id: &str) {
        let patch = EventPatch {
            status: Some(MetricStatus::Sent),
            ..Default::default()
        };
        self.apply("update_to_sent", correlation_id, patch).await;
    }

    /// Marks an event as acknowledged by the provider.
    ///
    /// Without an explicit latency the stored row is read back to compute
    /// `provider_ack_at - sent_at`; if that row does not exist nothing is written.
    pub async fn update_to_acked(&self, update: AckUpdate) {
        let provider_ack_at = update.provider_ack_at.unwrap_or_else(Utc::now);
        let latency_ms = match update.latency_ms {
            Some(latency) => latency,
            None => match self.store.get_event(&update.correlation_id).await {
                Ok(Some(event)) => elapsed_ms(event.sent_at, provider_ack_at),
                Ok(None) => {
                    debug!(correlation_id = %update.correlation_id, "No event to acknowledge");
                    return;
                }
                Err(e) => {
                    report("update_to_acked", &update.correlation_id, &e);
                    return;
                }
            },
        };

        let patch = EventPatch {
            status: Some(MetricStatus::Acked),
            provider_ack_at: Some(provider_ack_at),
            latency_ms: Some(latency_ms),
            retry: update.retry_count.map_or(RetryUpdate::Keep, RetryUpdate::Set),
            ..Default::default()
        };
        self.apply("update_to_acked", &update.correlation_id, patch)
            .await;
    }

    pub async fn update_to_delivered(
        &self,
        correlation_id: &str,
        delivered_at: Option<DateTime<Utc>>,
    ) {
        let patch = EventPatch {
            status: Some(MetricStatus::Delivered),
            delivered_at: Some(delivered_at.unwrap_or_else(Utc::now)),
            ..Default::default()
        };
        self.apply("update_to_delivered", correlation_id, patch)
            .await;
    }

    /// Marks an event as failed.
    ///
    /// An explicit `retry_count` is stored as given. Without one, the stored
    /// counter is incremented by one.
    pub async fn update_to_failed(
        &self,
        correlation_id: &str,
        error_code: &str,
        error_message: &str,
        retry_count: Option<u32>,
    ) {
        let patch = EventPatch {
            status: Some(MetricStatus::Failed),
            error_code: Some(error_code.to_string()),
            error_message: Some(error_message.to_string()),
            retry: retry_count.map_or(RetryUpdate::Increment, RetryUpdate::Set),
            ..Default::default()
        };
        self.apply("update_to_failed", correlation_id, patch).await;
    }

    /// Adds one to the retry counter of an existing event.
    pub async fn increment_retry_count(&self, correlation_id: &str) {
        let patch = EventPatch {
            retry: RetryUpdate::Increment,
            ..Default::default()
        };
        self.apply("increment_retry_count", correlation_id, patch)
            .await;
    }

    /// Fails every event of an experiment that is still `PENDING`, keeping
    /// its retry count. Returns how many events were updated.
    pub async fn fail_pending(
        &self,
        experiment_id: &str,
        error_code: &str,
        error_message: &str,
    ) -> u64 {
        let query = EventQuery {
            experiment_id: Some(experiment_id.to_string()),
            status: Some(MetricStatus::Pending),
            ..Default::default()
        };
        let pending = match self.store.find_events(&query).await {
            Ok(events) => events,
            Err(e) => {
                report("fail_pending", experiment_id, &e);
                return 0;
            }
        };

        let mut failed = 0;
        for event in pending {
            let patch = EventPatch {
                status: Some(MetricStatus::Failed),
                error_code: Some(error_code.to_string()),
                error_message: Some(error_message.to_string()),
                ..Default::default()
            };
            match self.store.update_event(&event.correlation_id, patch).await {
                Ok(n) => failed += n,
                Err(e) => report("fail_pending", &event.correlation_id, &e),
            }
        }
        failed
    }

    async fn apply(&self, operation: &'static str, correlation_id: &str, patch: EventPatch) {
        match self.store.update_event(correlation_id, patch).await {
            Ok(0) => debug!(operation, correlation_id, "No event matched update"),
            Ok(_) => {}
            Err(e) => report(operation, correlation_id, &e),
        }
    }
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let elapsed = to - from;
    match elapsed.num_microseconds() {
        Some(us) => (us as f64 / 1000.0).max(0.0),
        None => elapsed.num_milliseconds().max(0) as f64,
    }
}

fn report(operation: &'static str, correlation_id: &str, err: &StoreError) {
    error!(operation, correlation_id, error = %err, "Failed to record metric event");
    metrics::counter!("metric_recorder_errors_total", "operation" => operation).increment(1);
}
