//! notifybench - runs one notification experiment from the command line.

use anyhow::Result;
use clap::Parser;
use notifybench::{app::App, cli::Cli, config::Config, internal_metrics::MetricsBuilder};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing_subscriber::fmt().init();
            error!("Failed to load configuration: {}", err);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("notifybench starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Log Metrics: {}", config.metrics.log_metrics);
    info!("Experiment Timeout: {}s", config.runner.timeout_seconds);
    info!("Series Interval: {}ms", config.runner.series_interval_ms);
    info!("Default Rate: {}/s", config.runner.default_rate_per_sec);
    info!(
        "Email Relay: {}",
        if config.email.transport.endpoint.is_some() {
            "Configured"
        } else {
            "Not configured"
        }
    );
    info!(
        "Telegram Bot: {}",
        if config.telegram.bot_token.is_some() {
            "Configured"
        } else {
            "Not configured"
        }
    );
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let metrics_task = MetricsBuilder::new(config.metrics.clone()).build(shutdown_rx);

    let app = App::builder(config).build()?;
    let result = app.run_to_completion(cli.new_experiment()).await;

    let _ = shutdown_tx.send(());
    if let Some(handle) = metrics_task {
        let _ = handle.await;
    }

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
