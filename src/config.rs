//! Configuration management for notifybench
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer defaults, a `notifybench.toml` file, `NOTIFYBENCH_`
//! environment variables and command-line arguments.

use crate::cli::Cli;
use crate::core::{Channel, ChannelTarget};
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// The configuration file read when no `--config` flag is given.
pub const DEFAULT_CONFIG_FILE: &str = "notifybench.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// Configuration for the internal metrics recorder.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Configuration for the experiment runner.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Configuration for the email channel.
    #[serde(default)]
    pub email: EmailConfig,
    /// Configuration for the Telegram channel.
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Configuration for the internal metrics recorder.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Log metric counters to the console periodically.
    pub log_metrics: bool,
    /// The interval in seconds between metric log lines.
    pub log_aggregation_seconds: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            log_metrics: false,
            log_aggregation_seconds: 10,
        }
    }
}

/// Configuration for the experiment runner.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Wall-clock ceiling for a whole experiment, in seconds.
    pub timeout_seconds: u64,
    /// How often a series point is written while an experiment runs.
    pub series_interval_ms: u64,
    /// Rate used when an experiment does not set one.
    pub default_rate_per_sec: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30 * 60,
            series_interval_ms: 1000,
            default_rate_per_sec: 10,
        }
    }
}

/// Configuration for the email channel.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct EmailConfig {
    /// Destination address for experiment traffic.
    pub to: Option<String>,
    /// Sender address.
    pub from: String,
    /// Mail relay settings.
    pub transport: EmailTransportConfig,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            to: None,
            from: "noreply@example.com".to_string(),
            transport: EmailTransportConfig::default(),
        }
    }
}

/// Mail relay settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct EmailTransportConfig {
    /// URL of the HTTP mail relay.
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
}

impl Default for EmailTransportConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            username: None,
            password: None,
            timeout_ms: 10_000,
        }
    }
}

/// Configuration for the Telegram channel.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct TelegramConfig {
    /// Destination chat for experiment traffic. Numeric ids are accepted
    /// and kept as text.
    #[serde(deserialize_with = "string_or_number")]
    pub chat_id: Option<String>,
    pub bot_token: Option<String>,
    /// Base URL of the Bot API.
    pub api_url: String,
    pub timeout_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            chat_id: None,
            bot_token: None,
            api_url: "https://api.telegram.org".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChatId {
    Text(String),
    Number(i64),
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<ChatId>::deserialize(deserializer)?.map(|id| match id {
            ChatId::Text(text) => text,
            ChatId::Number(number) => number.to_string(),
        }),
    )
}

impl Config {
    /// Loads the application configuration.
    ///
    /// Sources are merged in order, later ones overriding earlier ones:
    /// built-in defaults, the TOML file (`--config` or `notifybench.toml`),
    /// `NOTIFYBENCH_` environment variables (`__` separates sections, e.g.
    /// `NOTIFYBENCH_TELEGRAM__CHAT_ID`) and finally the command line.
    pub fn load(cli: &Cli) -> Result<Self> {
        let path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("NOTIFYBENCH_").split("__"))
            .merge(cli)
            .extract()?;
        Ok(config)
    }

    /// The configuration keys a non-dry-run experiment on `target` needs,
    /// paired with whether each is currently set to a non-blank value.
    pub fn required_keys(&self, target: ChannelTarget) -> Vec<(&'static str, bool)> {
        let mut keys = Vec::new();
        for channel in target.channels() {
            match channel {
                Channel::Email => {
                    let transport = &self.email.transport;
                    keys.push(("email.to", is_set(&self.email.to)));
                    keys.push(("email.transport.endpoint", is_set(&transport.endpoint)));
                    keys.push(("email.transport.username", is_set(&transport.username)));
                    keys.push(("email.transport.password", is_set(&transport.password)));
                }
                Channel::Telegram => {
                    keys.push(("telegram.chat_id", is_set(&self.telegram.chat_id)));
                    keys.push(("telegram.bot_token", is_set(&self.telegram.bot_token)));
                }
            }
        }
        keys
    }

    /// Every required key for `target` that is absent or blank.
    pub fn missing_keys(&self, target: ChannelTarget) -> Vec<String> {
        self.required_keys(target)
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(key, _)| key.to_string())
            .collect()
    }

    /// The configured destination for a channel, if any.
    pub fn destination(&self, channel: Channel) -> Option<&str> {
        let value = match channel {
            Channel::Email => self.email.to.as_deref(),
            Channel::Telegram => self.telegram.chat_id.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn series_interval(&self) -> Duration {
        Duration::from_millis(self.series_interval_ms)
    }
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics: MetricsConfig::default(),
            runner: RunnerConfig::default(),
            email: EmailConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}
