/// notifybench - notification channel experiments and delivery metrics
///
/// This library runs controlled delivery experiments against email and
/// Telegram, records a metric event for every send attempt and aggregates
/// the results into latency, throughput and success KPIs.
pub mod aggregation;
pub mod app;
pub mod channels;
pub mod cli;
pub mod config;
pub mod core;
pub mod experiments;
pub mod formatting;
pub mod internal_metrics;
pub mod recorder;
pub mod runner;
pub mod stats;
pub mod store;

// Re-export core types for convenience
pub use core::*;
