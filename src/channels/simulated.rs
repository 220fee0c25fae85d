//! Simulated transports for dry-run experiments.
//!
//! Each channel gets a latency range and a success probability. The default
//! profiles make Telegram faster and more reliable than email so dry runs
//! show a realistic comparison without any network traffic.

use crate::core::{Channel, ChannelSender, OutboundMessage, SendOutcome};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// The latency and failure distribution of a simulated channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationProfile {
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    /// Probability in `[0, 1]` that a send is accepted.
    pub success_probability: f64,
    /// The simulated latency is slept for `latency * sleep_factor`.
    pub sleep_factor: f64,
}

impl SimulationProfile {
    /// 150-300 ms, 92 % success.
    pub fn email() -> Self {
        Self {
            min_latency_ms: 150.0,
            max_latency_ms: 300.0,
            success_probability: 0.92,
            sleep_factor: 1.2,
        }
    }

    /// 20-60 ms, 98 % success.
    pub fn telegram() -> Self {
        Self {
            min_latency_ms: 20.0,
            max_latency_ms: 60.0,
            success_probability: 0.98,
            sleep_factor: 0.8,
        }
    }

    pub fn for_channel(channel: Channel) -> Self {
        match channel {
            Channel::Email => Self::email(),
            Channel::Telegram => Self::telegram(),
        }
    }

    fn sample(&self) -> (f64, bool) {
        let mut rng = rand::rng();
        let low = self.min_latency_ms.min(self.max_latency_ms);
        let high = self.min_latency_ms.max(self.max_latency_ms);
        let latency = rng.random_range(low..=high);
        let success = rng.random_bool(self.success_probability.clamp(0.0, 1.0));
        (latency, success)
    }
}

/// A `ChannelSender` that sleeps for a sampled latency and flips a biased coin.
pub struct SimulatedSender {
    channel: Channel,
    profile: SimulationProfile,
    sequence: AtomicU64,
}

impl SimulatedSender {
    pub fn new(channel: Channel, profile: SimulationProfile) -> Self {
        Self {
            channel,
            profile,
            sequence: AtomicU64::new(0),
        }
    }

    /// A sender using the default profile of `channel`.
    pub fn for_channel(channel: Channel) -> Self {
        Self::new(channel, SimulationProfile::for_channel(channel))
    }
}

#[async_trait]
impl ChannelSender for SimulatedSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, _recipient: &str, _message: &OutboundMessage) -> SendOutcome {
        let (latency_ms, success) = self.profile.sample();
        let pause = (latency_ms * self.profile.sleep_factor).max(0.0);
        tokio::time::sleep(Duration::from_secs_f64(pause / 1000.0)).await;

        if success {
            let n = self.sequence.fetch_add(1, Ordering::Relaxed);
            SendOutcome::Accepted {
                message_id: format!("{}-dry-{}", self.channel.as_str().to_lowercase(), n),
                latency_ms: Some(latency_ms),
            }
        } else {
            SendOutcome::rejected("DRY_RUN_ERROR", "Simulated error")
        }
    }
}
