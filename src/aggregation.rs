//! Metrics Aggregation Service.
//!
//! Read-only queries over the recorded metric events and series points:
//! KPI summaries, paginated logs, latency time series, per-experiment
//! throughput and the economic-impact model.

use crate::core::{Channel, ChannelTarget, MetricEvent, MetricStatus};
use crate::stats::{
    derive_throughput, latency_stats, percentile, success_rate, LatencyStats, ThroughputPoint,
};
use crate::store::{EventQuery, MetricStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Filters shared by every event query. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsFilter {
    /// Inclusive lower bound on `sent_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `sent_at`.
    pub to: Option<DateTime<Utc>>,
    /// `Both` means every channel.
    pub channel: Option<ChannelTarget>,
    /// Blank ids are ignored.
    pub experiment_id: Option<String>,
}

impl MetricsFilter {
    pub fn for_experiment(id: impl Into<String>) -> Self {
        Self {
            experiment_id: Some(id.into()),
            ..Default::default()
        }
    }

    fn experiment_id(&self) -> Option<&str> {
        self.experiment_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    fn to_query(&self) -> EventQuery {
        EventQuery {
            from: self.from,
            to: self.to,
            channel: self.channel.and_then(|target| target.as_filter()),
            experiment_id: self.experiment_id().map(str::to_string),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSummary {
    pub channel: Channel,
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub success_rate: f64,
    pub p95_latency_ms: Option<f64>,
}

/// Delivery KPIs over a set of events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    /// Every initiated attempt, `PENDING` included.
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    /// `100 * delivered / sent`.
    pub success_rate: f64,
    pub p50_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    /// Only channels with events appear, in `Channel` order.
    pub by_channel: Vec<ChannelSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogsQuery {
    #[serde(flatten)]
    pub filter: MetricsFilter,
    pub status: Option<MetricStatus>,
    /// Case-insensitive substring of correlation id, recipient hash or template.
    pub search: Option<String>,
    /// 1-based; defaults to 1.
    pub page: Option<u32>,
    /// Defaults to 50.
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogsPage {
    /// Newest first.
    pub data: Vec<MetricEvent>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Percentiles of a latency sample; every field is `None` without data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyPercentiles {
    pub p50: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub avg: Option<f64>,
}

impl From<Option<LatencyStats>> for LatencyPercentiles {
    fn from(stats: Option<LatencyStats>) -> Self {
        Self {
            p50: stats.map(|s| s.p50),
            p95: stats.map(|s| s.p95),
            p99: stats.map(|s| s.p99),
            avg: stats.map(|s| s.avg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyBucket {
    /// Start of the second or hour the bucket covers.
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub percentiles: LatencyPercentiles,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelLatencyBucket {
    pub timestamp: DateTime<Utc>,
    pub channel: Channel,
    pub p95: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelLatency {
    pub channel: Channel,
    #[serde(flatten)]
    pub percentiles: LatencyPercentiles,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyReport {
    /// Ascending by timestamp.
    pub series: Vec<LatencyBucket>,
    /// Ascending by timestamp, then channel.
    pub series_by_channel: Vec<ChannelLatencyBucket>,
    pub overall: LatencyPercentiles,
    pub by_channel: Vec<ChannelLatency>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReductionScenarios {
    pub very_conservative: f64,
    pub medium_conservative: f64,
    pub moderately_conservative: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EconomicDefaults {
    pub annual_failed_hearings: f64,
    pub average_cost_per_hearing: f64,
    pub reduction_scenarios: ReductionScenarios,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicImpactInput {
    pub annual_failed_hearings: f64,
    pub average_cost_per_hearing: f64,
    /// Percentage in `[0, 100]`.
    pub reduction_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EconomicImpactInputs {
    pub annual_failed_hearings: f64,
    pub average_cost_per_hearing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EconomicImpact {
    pub reduction_percentage: f64,
    pub avoided_cancellations: u64,
    /// Rounded to cents.
    pub estimated_annual_savings: f64,
    pub inputs: EconomicImpactInputs,
    pub timestamp: DateTime<Utc>,
}

/// Read-side queries over a `MetricStore`.
pub struct MetricsService {
    store: Arc<dyn MetricStore>,
}

impl MetricsService {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn summary(&self, filter: &MetricsFilter) -> Result<MetricsSummary, MetricsError> {
        let events = self.store.find_events(&filter.to_query()).await?;
        debug!(events = events.len(), "Computing metrics summary");
        if events.is_empty() {
            warn!("No metric events match the summary filters");
        }

        let totals = Totals::of(events.iter());
        let latencies = latencies_of(events.iter());
        let overall = LatencyPercentiles::from(latency_stats(&latencies));

        let mut per_channel: BTreeMap<Channel, Vec<&MetricEvent>> = BTreeMap::new();
        for event in &events {
            per_channel.entry(event.channel).or_default().push(event);
        }
        let by_channel = per_channel
            .into_iter()
            .map(|(channel, events)| {
                let totals = Totals::of(events.iter().copied());
                ChannelSummary {
                    channel,
                    total_sent: totals.sent,
                    total_delivered: totals.delivered,
                    total_failed: totals.failed,
                    success_rate: success_rate(totals.delivered, totals.sent),
                    p95_latency_ms: percentile(&latencies_of(events.iter().copied()), 0.95),
                }
            })
            .collect();

        Ok(MetricsSummary {
            total_sent: totals.sent,
            total_delivered: totals.delivered,
            total_failed: totals.failed,
            success_rate: success_rate(totals.delivered, totals.sent),
            p50_latency_ms: overall.p50,
            p95_latency_ms: overall.p95,
            p99_latency_ms: overall.p99,
            avg_latency_ms: overall.avg,
            by_channel,
        })
    }

    /// One page of matching events, newest first.
    #[instrument(skip(self))]
    pub async fn logs(&self, query: &LogsQuery) -> Result<LogsPage, MetricsError> {
        let page = query.page.filter(|p| *p > 0).unwrap_or(1);
        let page_size = query
            .page_size
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        let mut event_query = query.filter.to_query();
        event_query.status = query.status;
        event_query.search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let total = self.store.count_events(&event_query).await?;
        let skip = (page as usize - 1).saturating_mul(page_size as usize);
        let data = self
            .store
            .find_events(&event_query)
            .await?
            .into_iter()
            .rev()
            .skip(skip)
            .take(page_size as usize)
            .collect::<Vec<_>>();
        debug!(total, returned = data.len(), page, "Fetched metric logs");

        Ok(LogsPage {
            data,
            total,
            page,
            page_size,
        })
    }

    /// Latency percentiles over time.
    ///
    /// Buckets are one second wide when the filter names an experiment and one
    /// hour wide otherwise.
    #[instrument(skip(self))]
    pub async fn latency(&self, filter: &MetricsFilter) -> Result<LatencyReport, MetricsError> {
        let mut query = filter.to_query();
        query.with_latency = true;
        let events = self.store.find_events(&query).await?;

        let width = if filter.experiment_id().is_some() {
            1
        } else {
            3600
        };

        let mut buckets: BTreeMap<DateTime<Utc>, Vec<f64>> = BTreeMap::new();
        let mut channel_buckets: BTreeMap<(DateTime<Utc>, Channel), Vec<f64>> = BTreeMap::new();
        let mut per_channel: BTreeMap<Channel, Vec<f64>> = BTreeMap::new();
        let mut all = Vec::with_capacity(events.len());

        for event in &events {
            let Some(latency) = event.latency_ms else {
                continue;
            };
            let bucket = bucket_start(event.sent_at, width);
            buckets.entry(bucket).or_default().push(latency);
            channel_buckets
                .entry((bucket, event.channel))
                .or_default()
                .push(latency);
            per_channel.entry(event.channel).or_default().push(latency);
            all.push(latency);
        }

        let series = buckets
            .into_iter()
            .map(|(timestamp, latencies)| LatencyBucket {
                timestamp,
                percentiles: latency_stats(&latencies).into(),
            })
            .collect();
        let series_by_channel = channel_buckets
            .into_iter()
            .map(|((timestamp, channel), latencies)| ChannelLatencyBucket {
                timestamp,
                channel,
                p95: percentile(&latencies, 0.95),
            })
            .collect();
        let by_channel = per_channel
            .into_iter()
            .map(|(channel, latencies)| ChannelLatency {
                channel,
                percentiles: latency_stats(&latencies).into(),
            })
            .collect();

        Ok(LatencyReport {
            series,
            series_by_channel,
            overall: latency_stats(&all).into(),
            by_channel,
        })
    }

    /// Send rate between consecutive series points of an experiment.
    pub async fn throughput(&self, experiment_id: &str) -> Result<Vec<ThroughputPoint>, MetricsError> {
        let points = self.store.series_points(experiment_id).await?;
        Ok(derive_throughput(&points))
    }

    pub fn economic_defaults(&self) -> EconomicDefaults {
        economic_defaults()
    }

    pub fn calculate_economic_impact(
        &self,
        input: &EconomicImpactInput,
    ) -> Result<EconomicImpact, MetricsError> {
        calculate_economic_impact(input)
    }
}

#[derive(Debug, Default)]
struct Totals {
    sent: u64,
    delivered: u64,
    failed: u64,
}

impl Totals {
    fn of<'a>(events: impl Iterator<Item = &'a MetricEvent>) -> Self {
        let mut totals = Totals::default();
        for event in events {
            if event.status.counts_as_sent() {
                totals.sent += 1;
            }
            match event.status {
                MetricStatus::Delivered => totals.delivered += 1,
                MetricStatus::Failed => totals.failed += 1,
                _ => {}
            }
        }
        totals
    }
}

fn latencies_of<'a>(events: impl Iterator<Item = &'a MetricEvent>) -> Vec<f64> {
    events.filter_map(|e| e.latency_ms).collect()
}

fn bucket_start(at: DateTime<Utc>, width_secs: i64) -> DateTime<Utc> {
    let secs = at.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(width_secs), 0).unwrap_or(at)
}

/// Figures for the hearing-cancellation cost model.
pub fn economic_defaults() -> EconomicDefaults {
    EconomicDefaults {
        annual_failed_hearings: 75_363.0,
        average_cost_per_hearing: 339.04,
        reduction_scenarios: ReductionScenarios {
            very_conservative: 10.0,
            medium_conservative: 20.0,
            moderately_conservative: 30.0,
        },
    }
}

/// Estimates the yearly savings of avoiding a share of failed hearings.
pub fn calculate_economic_impact(input: &EconomicImpactInput) -> Result<EconomicImpact, MetricsError> {
    let finite_non_negative = |v: f64| v.is_finite() && v >= 0.0;
    if !finite_non_negative(input.annual_failed_hearings) {
        return Err(MetricsError::InvalidInput(
            "annual_failed_hearings must be a non-negative number".to_string(),
        ));
    }
    if !finite_non_negative(input.average_cost_per_hearing) {
        return Err(MetricsError::InvalidInput(
            "average_cost_per_hearing must be a non-negative number".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&input.reduction_percentage) {
        return Err(MetricsError::InvalidInput(
            "reduction_percentage must be between 0 and 100".to_string(),
        ));
    }

    let avoided = (input.annual_failed_hearings * input.reduction_percentage / 100.0).round();
    let savings = (avoided * input.average_cost_per_hearing * 100.0).round() / 100.0;

    Ok(EconomicImpact {
        reduction_percentage: input.reduction_percentage,
        avoided_cancellations: avoided as u64,
        estimated_annual_savings: savings,
        inputs: EconomicImpactInputs {
            annual_failed_hearings: input.annual_failed_hearings,
            average_cost_per_hearing: input.average_cost_per_hearing,
        },
        timestamp: Utc::now(),
    })
}
