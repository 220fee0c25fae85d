#![allow(dead_code)]
use async_trait::async_trait;
use notifybench::core::{Channel, ChannelSender, OutboundMessage, SendOutcome};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

/// A transport that records every call and answers with a fixed outcome.
///
/// It also tracks how many sends are in flight at once.
#[derive(Clone)]
pub struct MockSender {
    channel: Channel,
    reject_with: Option<String>,
    delay: Duration,
    pub calls: Arc<Mutex<Vec<(String, OutboundMessage)>>>,
    active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
}

impl MockSender {
    pub fn accepting(channel: Channel) -> Self {
        Self {
            channel,
            reject_with: None,
            delay: Duration::from_millis(10),
            calls: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn rejecting(channel: Channel, code: &str) -> Self {
        Self {
            reject_with: Some(code.to_string()),
            ..Self::accepting(channel)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(recipient, _)| recipient.clone())
            .collect()
    }
}

#[async_trait]
impl ChannelSender for MockSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient: &str, message: &OutboundMessage) -> SendOutcome {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((recipient.to_string(), message.clone()));

        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        match &self.reject_with {
            Some(code) => SendOutcome::rejected(code.clone(), "mock rejection"),
            None => SendOutcome::Accepted {
                message_id: format!("mock-{}", self.call_count()),
                latency_ms: None,
            },
        }
    }
}
