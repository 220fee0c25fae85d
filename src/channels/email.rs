//! A client for sending experiment email through an HTTP mail relay.
//!
//! The relay takes a JSON message and authenticates with the SMTP-style
//! username/password pair from `[email.transport]`.

use crate::config::EmailConfig;
use crate::core::{Channel, ChannelSender, OutboundMessage, SendOutcome};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Sends email by posting to a mail relay endpoint.
pub struct HttpEmailSender {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
    from: String,
}

#[derive(Debug, Deserialize, Default)]
struct RelayResponse {
    #[serde(default, alias = "id")]
    message_id: Option<String>,
}

impl HttpEmailSender {
    /// Creates a new `HttpEmailSender`.
    pub fn new(
        endpoint: String,
        username: String,
        password: String,
        from: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            username,
            password,
            from,
        })
    }

    /// Builds a sender from configuration, or `None` when the relay endpoint
    /// is not configured.
    pub fn from_config(config: &EmailConfig) -> Result<Option<Self>> {
        let transport = &config.transport;
        let endpoint = match transport.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => endpoint.to_string(),
            _ => return Ok(None),
        };
        Ok(Some(Self::new(
            endpoint,
            transport.username.clone().unwrap_or_default(),
            transport.password.clone().unwrap_or_default(),
            config.from.clone(),
            Duration::from_millis(transport.timeout_ms),
        )?))
    }
}

#[async_trait]
impl ChannelSender for HttpEmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    #[instrument(skip_all)]
    async fn send(&self, recipient: &str, message: &OutboundMessage) -> SendOutcome {
        let payload = json!({
            "from": self.from,
            "to": recipient,
            "subject": message.subject,
            "html": message.body,
        });

        let result = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .json(&payload)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                let e = e.without_url();
                warn!(error = %e, "HTTP request to mail relay failed");
                let code = if e.is_timeout() {
                    "SMTP_TIMEOUT"
                } else {
                    "NETWORK_ERROR"
                };
                return SendOutcome::rejected(code, e.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %text, "Mail relay rejected message");
            let code = if status == reqwest::StatusCode::UNAUTHORIZED {
                "EAUTH"
            } else {
                "SMTP_ERROR"
            };
            return SendOutcome::rejected(code, format!("relay returned {}: {}", status, text));
        }

        // Relays that do not echo an id still accepted the message.
        let body = response.json::<RelayResponse>().await.unwrap_or_default();
        let message_id = body
            .message_id
            .unwrap_or_else(|| format!("relay-{}", uuid::Uuid::new_v4()));
        debug!(message_id = %message_id, "Mail relay accepted message");
        SendOutcome::Accepted {
            message_id,
            latency_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sender(server: &MockServer) -> HttpEmailSender {
        HttpEmailSender::new(
            format!("{}/send", server.uri()),
            "relay-user".to_string(),
            "relay-pass".to_string(),
            "bench@example.com".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            subject: "Test baseline - Message 1".to_string(),
            body: "<p>hello</p>".to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_success_uses_relay_id() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(header_exists("authorization"))
            .and(body_json(json!({
                "from": "bench@example.com",
                "to": "ops@example.com",
                "subject": "Test baseline - Message 1",
                "html": "<p>hello</p>",
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "id": "abc-123" })))
            .mount(&server)
            .await;

        // Act
        let outcome = sender(&server).send("ops@example.com", &message()).await;

        // Assert
        assert_eq!(
            outcome,
            SendOutcome::Accepted {
                message_id: "abc-123".to_string(),
                latency_ms: None
            }
        );
    }

    #[tokio::test]
    async fn test_send_without_relay_id_generates_one() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let outcome = sender(&server).send("ops@example.com", &message()).await;

        match outcome {
            SendOutcome::Accepted { message_id, .. } => assert!(message_id.starts_with("relay-")),
            other => panic!("expected acceptance, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_handles_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("mailbox unavailable"))
            .mount(&server)
            .await;

        let outcome = sender(&server).send("ops@example.com", &message()).await;

        match outcome {
            SendOutcome::Rejected { code, message } => {
                assert_eq!(code, "SMTP_ERROR");
                assert!(message.contains("mailbox unavailable"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_from_config_requires_endpoint() {
        let config = EmailConfig::default();
        assert!(HttpEmailSender::from_config(&config).unwrap().is_none());
    }
}
