mod helpers;

use helpers::mock_sender::MockSender;
use helpers::{configured, new_experiment, settings};
use notifybench::app::App;
use notifybench::channels::{SimulatedSender, SimulationProfile};
use notifybench::config::Config;
use notifybench::core::{Channel, ChannelTarget, ExperimentStatus, MetricStatus};
use notifybench::store::{EventQuery, MetricStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn certain(min_latency_ms: f64) -> SimulationProfile {
    SimulationProfile {
        min_latency_ms,
        max_latency_ms: min_latency_ms,
        success_probability: 1.0,
        sleep_factor: 1.0,
    }
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_to_completion() {
    let app = App::builder(Config::default())
        .simulator_override(Arc::new(SimulatedSender::new(Channel::Email, certain(5.0))))
        .simulator_override(Arc::new(SimulatedSender::new(Channel::Telegram, certain(2.0))))
        .build()
        .unwrap();

    let report = app
        .run_to_completion(new_experiment(ChannelTarget::Both, 4, true))
        .await
        .unwrap();

    assert_eq!(report.experiment.experiment.status, ExperimentStatus::Done);
    assert_eq!(report.experiment.event_count, 8);
    assert_eq!(report.summary.total_success, 8);
    assert_eq!(report.summary.p99_latency_ms, Some(5.0));
    // Events stop at ACKED, so none count as delivered.
    assert_eq!(report.metrics.total_sent, 8);
    assert_eq!(report.metrics.total_delivered, 0);
    assert_eq!(report.metrics.by_channel.len(), 2);

    let serialized = serde_json::to_value(&report).unwrap();
    assert_eq!(serialized["experiment"]["status"], "DONE");
    assert_eq!(serialized["experiment"]["channel_target"], "BOTH");
    assert!(serialized["summary"].get("error").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_run_is_still_reported() {
    let app = App::builder(configured())
        .sender_override(Arc::new(
            MockSender::accepting(Channel::Email).with_delay(Duration::from_secs(10)),
        ))
        .settings_override(settings(Duration::from_secs(2)))
        .build()
        .unwrap();

    let report = app
        .run_to_completion(new_experiment(ChannelTarget::Email, 3, false))
        .await
        .unwrap();

    assert_eq!(report.experiment.experiment.status, ExperimentStatus::Failed);
    assert!(report.summary.error.unwrap().contains("time limit"));
    assert_eq!(report.summary.total_sent, 0);
}

#[tokio::test]
async fn test_invalid_experiment_is_an_error() {
    let app = App::builder(Config::default()).build().unwrap();

    let result = app
        .run_to_completion(new_experiment(ChannelTarget::Email, 0, true))
        .await;

    assert!(result.is_err());
    assert!(app.store().list_experiments().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_real_telegram_run_against_bot_api() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bot123:abc/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": { "message_id": 7 }
        })))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = configured();
    config.telegram.api_url = server.uri();
    let app = App::builder(config).build().unwrap();
    let mut experiment = new_experiment(ChannelTarget::Telegram, 3, false);
    experiment.rate_per_sec = Some(100);

    // Act
    let report = app.run_to_completion(experiment).await.unwrap();

    // Assert
    assert_eq!(report.experiment.experiment.status, ExperimentStatus::Done);
    assert_eq!(report.summary.total_success, 3);
    let events = app
        .store()
        .find_events(&EventQuery {
            experiment_id: Some(report.experiment.experiment.id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.status == MetricStatus::Acked
        && e.channel == Channel::Telegram
        && e.latency_ms.is_some()));
}
