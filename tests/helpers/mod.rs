#![allow(dead_code)]
pub mod failing_store;
pub mod mock_sender;

use chrono::{DateTime, Utc};
use notifybench::config::Config;
use notifybench::core::{
    Channel, ChannelTarget, ExperimentConfig, ExperimentStatus, MetricEvent, MetricStatus,
    NewExperiment,
};
use notifybench::runner::RunnerSettings;
use std::time::Duration;

/// A configuration with every channel setting filled in.
pub fn configured() -> Config {
    let mut config = Config::default();
    config.email.to = Some("bench@example.com".to_string());
    config.email.transport.endpoint = Some("http://127.0.0.1:9/send".to_string());
    config.email.transport.username = Some("relay".to_string());
    config.email.transport.password = Some("secret".to_string());
    config.telegram.chat_id = Some("-100200".to_string());
    config.telegram.bot_token = Some("123:abc".to_string());
    config
}

pub fn new_experiment(target: ChannelTarget, total_messages: u32, dry_run: bool) -> NewExperiment {
    NewExperiment {
        name: "integration".to_string(),
        description: None,
        scenario: "baseline".to_string(),
        channel_target: target,
        total_messages,
        concurrency: 2,
        rate_per_sec: Some(10),
        dry_run,
        created_by: Some("tests".to_string()),
    }
}

/// A stored experiment as the runner expects to find it.
pub fn created_experiment(id: &str, target: ChannelTarget, total_messages: u32) -> ExperimentConfig {
    ExperimentConfig {
        id: id.to_string(),
        name: "integration".to_string(),
        description: None,
        scenario: "baseline".to_string(),
        channel_target: target,
        total_messages,
        concurrency: 2,
        rate_per_sec: Some(10),
        dry_run: false,
        created_by: None,
        status: ExperimentStatus::Created,
        created_at: Utc::now(),
        started_at: None,
        finished_at: None,
        summary: None,
    }
}

pub fn settings(timeout: Duration) -> RunnerSettings {
    RunnerSettings {
        timeout,
        series_interval: Duration::from_secs(1),
        default_rate_per_sec: 10,
    }
}

pub fn event(
    correlation_id: &str,
    channel: Channel,
    status: MetricStatus,
    sent_at: DateTime<Utc>,
    latency_ms: Option<f64>,
    experiment_id: Option<&str>,
) -> MetricEvent {
    MetricEvent {
        correlation_id: correlation_id.to_string(),
        channel,
        template: Some("experiment-baseline".to_string()),
        recipient_hash: format!("hash-{}", correlation_id),
        status,
        sent_at,
        provider_ack_at: None,
        delivered_at: None,
        latency_ms,
        error_code: None,
        error_message: None,
        retry_count: 0,
        experiment_id: experiment_id.map(str::to_string),
    }
}
