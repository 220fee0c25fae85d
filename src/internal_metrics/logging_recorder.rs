//! A metrics recorder that periodically logs all captured metrics.

use crate::stats::latency_stats;
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use metrics_util::registry::{AtomicStorage, Registry};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A metrics recorder that periodically logs all captured metrics with `tracing::info!`.
pub struct LoggingRecorder {
    registry: Arc<Registry<Key, AtomicStorage>>,
}

impl LoggingRecorder {
    /// Creates a new `LoggingRecorder` and starts a background task to log metrics.
    ///
    /// # Arguments
    /// * `interval` - The interval at which to log the metrics.
    /// * `shutdown_rx` - The task stops when the sender side changes or is dropped.
    pub fn new(interval: Duration, shutdown_rx: watch::Receiver<()>) -> (Self, JoinHandle<()>) {
        let registry = Arc::new(Registry::new(AtomicStorage));
        let recorder = Self {
            registry: registry.clone(),
        };

        let mut shutdown_rx = shutdown_rx;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::debug!("--- Metrics Snapshot ---");
                        for line in snapshot(&registry) {
                            tracing::info!("{}", line);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        for line in snapshot(&registry) {
                            tracing::info!("{}", line);
                        }
                        tracing::debug!("Metrics logging task received shutdown signal.");
                        break;
                    }
                }
            }
        });

        (recorder, handle)
    }
}

/// Renders every registered metric as one log line.
///
/// Histogram samples are drained, so each line covers the samples recorded
/// since the previous snapshot.
fn snapshot(registry: &Registry<Key, AtomicStorage>) -> Vec<String> {
    let mut lines = Vec::new();

    let mut counters: Vec<_> = registry.get_counter_handles().into_iter().collect();
    counters.sort_by(|a, b| a.0.name().cmp(b.0.name()));
    for (key, counter) in counters {
        lines.push(format!("[Counter] {}: {}", key, counter.load(Ordering::Relaxed)));
    }

    for (key, gauge) in registry.get_gauge_handles() {
        let value = f64::from_bits(gauge.load(Ordering::Relaxed));
        lines.push(format!("[Gauge] {}: {}", key, value));
    }

    for (key, histogram) in registry.get_histogram_handles() {
        let mut samples = Vec::new();
        histogram.clear_with(|chunk| samples.extend_from_slice(chunk));
        if let Some(stats) = latency_stats(&samples) {
            lines.push(format!(
                "[Histogram] {}: n={} avg={:.1} p50={:.1} p95={:.1}",
                key,
                samples.len(),
                stats.avg,
                stats.p50,
                stats.p95
            ));
        }
    }

    lines
}

impl Recorder for LoggingRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        self.registry.get_or_create_counter(key, |c| c.clone()).into()
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        self.registry.get_or_create_gauge(key, |g| g.clone()).into()
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        self.registry.get_or_create_histogram(key, |h| h.clone()).into()
    }
}
