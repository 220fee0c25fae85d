// src/formatting.rs

use crate::core::{Channel, ExperimentConfig, OutboundMessage};

/// Builds the content of one experiment message for a channel.
pub trait MessageFormatter: Send + Sync {
    /// `index` is zero-based; rendered messages count from 1.
    fn format_message(&self, experiment: &ExperimentConfig, index: u32) -> OutboundMessage;
}

/// Email messages: a numbered subject and a short HTML paragraph.
pub struct EmailFormatter;

impl MessageFormatter for EmailFormatter {
    fn format_message(&self, experiment: &ExperimentConfig, index: u32) -> OutboundMessage {
        let name = escape_html(&experiment.name);
        OutboundMessage {
            subject: format!("Test {} - Message {}", experiment.name, index + 1),
            body: format!(
                "<p>This is a test message from experiment \"{}\".<br/>Message #{} of {}</p>",
                name,
                index + 1,
                experiment.total_messages
            ),
        }
    }
}

/// Telegram messages, rendered with the Bot API `HTML` parse mode.
pub struct TelegramFormatter;

impl MessageFormatter for TelegramFormatter {
    fn format_message(&self, experiment: &ExperimentConfig, index: u32) -> OutboundMessage {
        OutboundMessage {
            subject: String::new(),
            body: format!(
                "🧪 <b>Test {}</b>\n\nThis is a test message from the experiment.\nMessage #{} of {}",
                escape_html(&experiment.name),
                index + 1,
                experiment.total_messages
            ),
        }
    }
}

/// The formatter used for a channel.
pub fn formatter_for(channel: Channel) -> &'static dyn MessageFormatter {
    match channel {
        Channel::Email => &EmailFormatter,
        Channel::Telegram => &TelegramFormatter,
    }
}

/// Escapes the characters that are significant in the HTML subset both
/// channels accept.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
