//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. Configuration overrides are fed into figment through the
//! `Provider` impl below; the experiment arguments describe the run to launch.

use crate::core::{ChannelTarget, NewExperiment};
use clap::Parser;
use figment::{
    providers::Serialized,
    value::{Dict, Map},
    Error, Metadata, Profile, Provider,
};
use serde::Serialize;
use std::path::PathBuf;

/// Runs a notification delivery experiment and prints its metrics.
#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Overrides the configured log level.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Overrides the experiment timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// Enables periodic logging of internal metric counters.
    #[arg(long)]
    pub log_metrics: bool,

    /// Name of the experiment.
    #[arg(long, default_value = "cli-experiment")]
    pub name: String,

    /// Scenario tag, used in the message template name.
    #[arg(long, default_value = "baseline")]
    pub scenario: String,

    /// Target channel: email, telegram or both.
    #[arg(long, value_name = "TARGET", default_value = "email")]
    pub channel: Option<ChannelTarget>,

    /// Number of logical messages to send.
    #[arg(long, default_value_t = 10)]
    pub messages: u32,

    /// Maximum number of in-flight messages.
    #[arg(long, default_value_t = 2)]
    pub concurrency: u32,

    /// Target rate in messages per second.
    #[arg(long)]
    pub rate: Option<u32>,

    /// Simulate sends instead of calling the real transports.
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// The experiment described by the command-line arguments.
    pub fn new_experiment(&self) -> NewExperiment {
        NewExperiment {
            name: self.name.clone(),
            description: None,
            scenario: self.scenario.clone(),
            channel_target: self.channel.unwrap_or(ChannelTarget::Email),
            total_messages: self.messages,
            concurrency: self.concurrency,
            rate_per_sec: self.rate,
            dry_run: self.dry_run,
            created_by: Some("cli".to_string()),
        }
    }
}

/// The subset of `Config` the command line can override.
#[derive(Serialize, Default)]
struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    runner: Option<RunnerOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<MetricsOverrides>,
}

#[derive(Serialize)]
struct RunnerOverrides {
    timeout_seconds: u64,
}

#[derive(Serialize)]
struct MetricsOverrides {
    log_metrics: bool,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let overrides = CliOverrides {
            log_level: self.log_level.clone(),
            runner: self
                .timeout_seconds
                .map(|timeout_seconds| RunnerOverrides { timeout_seconds }),
            // Only an explicit flag overrides the file; absence keeps the configured value.
            metrics: self
                .log_metrics
                .then_some(MetricsOverrides { log_metrics: true }),
        };
        Serialized::defaults(overrides).data()
    }
}
