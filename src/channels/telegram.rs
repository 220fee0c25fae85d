//! A client for sending experiment messages through the Telegram Bot API.

use crate::config::TelegramConfig;
use crate::core::{Channel, ChannelSender, OutboundMessage, SendOutcome};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Sends messages with the Bot API `sendMessage` method.
pub struct TelegramSender {
    client: reqwest::Client,
    api_url: String,
    bot_token: String,
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<SentMessage>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramSender {
    /// Creates a new `TelegramSender`.
    pub fn new(api_url: String, bot_token: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token,
        })
    }

    /// Builds a sender from configuration, or `None` when no bot token is set.
    pub fn from_config(config: &TelegramConfig) -> Result<Option<Self>> {
        match config.bot_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(Some(Self::new(
                config.api_url.clone(),
                token.to_string(),
                Duration::from_millis(config.timeout_ms),
            )?)),
            _ => Ok(None),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.bot_token)
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    #[instrument(skip_all)]
    async fn send(&self, recipient: &str, message: &OutboundMessage) -> SendOutcome {
        let payload = json!({
            "chat_id": recipient,
            "text": message.body,
            "parse_mode": "HTML",
        });

        let response = match self.client.post(self.endpoint()).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                // The request URL embeds the bot token.
                let e = e.without_url();
                warn!(error = %e, "HTTP request to Telegram failed");
                let code = if e.is_timeout() {
                    "TELEGRAM_TIMEOUT"
                } else {
                    "TELEGRAM_NETWORK_ERROR"
                };
                return SendOutcome::rejected(code, e.to_string());
            }
        };

        let status = response.status();
        match response.json::<BotApiResponse>().await {
            Ok(BotApiResponse {
                ok: true,
                result: Some(sent),
                ..
            }) => {
                debug!(message_id = sent.message_id, "Telegram accepted message");
                SendOutcome::Accepted {
                    message_id: sent.message_id.to_string(),
                    latency_ms: None,
                }
            }
            Ok(body) => {
                let description = body
                    .description
                    .unwrap_or_else(|| "Telegram did not return a message id".to_string());
                warn!(status = %status, description = %description, "Telegram rejected message");
                SendOutcome::rejected("TELEGRAM_SEND_ERROR", description)
            }
            Err(e) => {
                let e = e.without_url();
                warn!(status = %status, error = %e, "Unreadable Telegram response");
                SendOutcome::rejected(
                    "TELEGRAM_SEND_ERROR",
                    format!("unexpected response (status {}): {}", status, e),
                )
            }
        }
    }
}
