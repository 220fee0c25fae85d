//! Core domain types and service traits for notifybench
//!
//! This module defines the data structures shared by the runner, the recorder
//! and the aggregation service, together with the trait contract every
//! delivery channel implements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A concrete delivery channel. Every `MetricEvent` carries exactly one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Email,
    Telegram,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "EMAIL",
            Channel::Telegram => "TELEGRAM",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The channels an experiment dispatches to.
///
/// `Both` is a dispatch-target concept only: it fans each logical message out
/// to one email and one chat send and is never stored on an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelTarget {
    Email,
    Telegram,
    Both,
}

impl ChannelTarget {
    /// The physical channels a single logical message is sent through.
    pub fn channels(&self) -> &'static [Channel] {
        match self {
            ChannelTarget::Email => &[Channel::Email],
            ChannelTarget::Telegram => &[Channel::Telegram],
            ChannelTarget::Both => &[Channel::Email, Channel::Telegram],
        }
    }

    /// Narrows the target to a single channel filter. `Both` means "any".
    pub fn as_filter(&self) -> Option<Channel> {
        match self {
            ChannelTarget::Email => Some(Channel::Email),
            ChannelTarget::Telegram => Some(Channel::Telegram),
            ChannelTarget::Both => None,
        }
    }
}

impl FromStr for ChannelTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(ChannelTarget::Email),
            "telegram" => Ok(ChannelTarget::Telegram),
            "both" => Ok(ChannelTarget::Both),
            other => Err(format!(
                "unknown channel target '{}', expected email, telegram or both",
                other
            )),
        }
    }
}

/// Lifecycle of a single send attempt.
///
/// `PENDING -> SENT -> ACKED -> DELIVERED`, with `FAILED` reachable from any
/// non-terminal state. Transitions are not validated; the latest write wins.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricStatus {
    Pending,
    Sent,
    Acked,
    Delivered,
    Failed,
}

impl MetricStatus {
    /// Every status counts as "sent": an attempt that was initiated counts
    /// even before it is confirmed.
    pub fn counts_as_sent(&self) -> bool {
        matches!(
            self,
            MetricStatus::Pending
                | MetricStatus::Sent
                | MetricStatus::Acked
                | MetricStatus::Delivered
                | MetricStatus::Failed
        )
    }
}

/// Lifecycle of an experiment: `CREATED -> RUNNING -> DONE | FAILED`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    Created,
    Running,
    Done,
    Failed,
}

impl ExperimentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentStatus::Done | ExperimentStatus::Failed)
    }
}

/// Parameters for creating an experiment, before range validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewExperiment {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub scenario: String,
    pub channel_target: ChannelTarget,
    pub total_messages: u32,
    pub concurrency: u32,
    #[serde(default)]
    pub rate_per_sec: Option<u32>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// A persisted experiment. Its parameters are immutable once created; only
/// the status, timestamps and summary change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentConfig {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub scenario: String,
    pub channel_target: ChannelTarget,
    pub total_messages: u32,
    pub concurrency: u32,
    pub rate_per_sec: Option<u32>,
    pub dry_run: bool,
    pub created_by: Option<String>,
    pub status: ExperimentStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: Option<ExperimentSummary>,
}

/// One logical send attempt on one channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricEvent {
    pub correlation_id: String,
    pub channel: Channel,
    pub template: Option<String>,
    /// Hash of the recipient identifier. The raw address is never stored.
    pub recipient_hash: String,
    pub status: MetricStatus,
    pub sent_at: DateTime<Utc>,
    pub provider_ack_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<f64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub experiment_id: Option<String>,
}

/// A cumulative snapshot of an experiment's counters at a given second offset.
///
/// At most one point exists per `(experiment_id, t_offset_sec)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesPoint {
    pub experiment_id: String,
    pub t_offset_sec: u64,
    pub sent_count: u64,
    pub success_count: u64,
    pub fail_count: u64,
    /// p95 over every latency observed since the start of the run.
    pub p95_latency_ms: Option<f64>,
}

/// Final statistics of an experiment run, written on completion or failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExperimentSummary {
    pub total_sent: u64,
    pub total_success: u64,
    pub total_failed: u64,
    pub success_rate: f64,
    pub p50_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub duration_ms: u64,
    pub duration_sec: f64,
    /// Messages per second over the whole run.
    pub throughput: f64,
    /// The configured rate, an approximation of the best achievable pace.
    pub peak_throughput: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The content handed to a channel transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OutboundMessage {
    /// Used by channels that have one (email); ignored otherwise.
    pub subject: String,
    pub body: String,
}

/// The result of a single transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The provider accepted the message.
    Accepted {
        message_id: String,
        /// Set when the transport measures latency itself (simulations).
        latency_ms: Option<f64>,
    },
    /// The provider rejected the message or could not be reached.
    Rejected { code: String, message: String },
}

impl SendOutcome {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        SendOutcome::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Sends one message through a delivery channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// The channel this sender delivers through.
    fn channel(&self) -> Channel;

    /// Sends `message` to `recipient` (an email address or a chat id).
    ///
    /// Transport failures are reported as `SendOutcome::Rejected`, never as a
    /// panic or an error, so a single failed message cannot abort a batch.
    async fn send(&self, recipient: &str, message: &OutboundMessage) -> SendOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_target_expands_to_two_channels() {
        assert_eq!(
            ChannelTarget::Both.channels(),
            &[Channel::Email, Channel::Telegram]
        );
        assert_eq!(ChannelTarget::Email.channels(), &[Channel::Email]);
        assert_eq!(ChannelTarget::Both.as_filter(), None);
    }

    #[test]
    fn test_channel_target_parsing() {
        assert_eq!("EMAIL".parse::<ChannelTarget>(), Ok(ChannelTarget::Email));
        assert_eq!(" both ".parse::<ChannelTarget>(), Ok(ChannelTarget::Both));
        assert!("sms".parse::<ChannelTarget>().is_err());
    }

    #[test]
    fn test_status_serializes_in_upper_case() {
        let json = serde_json::to_string(&MetricStatus::Delivered).unwrap();
        assert_eq!(json, "\"DELIVERED\"");
        let target: ChannelTarget = serde_json::from_str("\"BOTH\"").unwrap();
        assert_eq!(target, ChannelTarget::Both);
    }
}
