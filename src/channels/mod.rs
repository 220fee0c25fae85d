//! Delivery channel transports.
//!
//! Every transport implements `core::ChannelSender`. The runner only picks
//! which sender to call; it never looks inside a transport.

pub mod email;
pub mod simulated;
pub mod telegram;

pub use crate::core::ChannelSender;
pub use email::HttpEmailSender;
pub use simulated::{SimulatedSender, SimulationProfile};
pub use telegram::TelegramSender;

/// Hashes a recipient identifier for storage.
///
/// Metric events only ever carry this digest (16 hex characters), never the
/// address or chat id itself.
pub fn hash_recipient(identifier: &str) -> String {
    let digest = blake3::hash(identifier.as_bytes()).to_hex();
    digest[..16].to_string()
}
