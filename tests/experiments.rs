mod helpers;

use helpers::mock_sender::MockSender;
use helpers::{configured, new_experiment};
use notifybench::config::Config;
use notifybench::core::{Channel, ChannelTarget, ExperimentStatus};
use notifybench::experiments::ExperimentService;
use notifybench::runner::{ExperimentError, ExperimentRunner};
use notifybench::store::{EventQuery, InMemoryStore, MetricStore};
use std::sync::Arc;
use std::time::Duration;

fn service(runner: ExperimentRunner, store: Arc<InMemoryStore>) -> ExperimentService {
    ExperimentService::new(store, Arc::new(runner))
}

fn dry_service() -> (Arc<InMemoryStore>, ExperimentService) {
    let store = Arc::new(InMemoryStore::new());
    let runner = ExperimentRunner::new(store.clone(), Config::default());
    (store.clone(), service(runner, store))
}

#[tokio::test]
async fn test_create_stores_a_created_experiment() {
    let (store, service) = dry_service();
    let mut new = new_experiment(ChannelTarget::Both, 20, true);
    new.name = "  padded  ".to_string();

    let created = service.create(new).await.unwrap();

    assert_eq!(created.status, ExperimentStatus::Created);
    assert_eq!(created.name, "padded");
    assert!(uuid::Uuid::parse_str(&created.id).is_ok());
    assert!(created.started_at.is_none());
    assert_eq!(store.get_experiment(&created.id).await.unwrap(), Some(created));
}

#[tokio::test]
async fn test_create_rejects_out_of_range_parameters() {
    let (store, service) = dry_service();

    let mut too_many = new_experiment(ChannelTarget::Email, 10_001, true);
    let err = service.create(too_many.clone()).await.unwrap_err();
    assert!(matches!(err, ExperimentError::InvalidConfig(msg) if msg.contains("total_messages")));

    too_many.total_messages = 10;
    too_many.concurrency = 0;
    assert!(service.create(too_many.clone()).await.is_err());

    too_many.concurrency = 1;
    too_many.rate_per_sec = Some(1_001);
    assert!(service.create(too_many).await.is_err());

    assert!(store.list_experiments().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_runs_in_background_until_done() {
    let (_, service) = dry_service();
    let created = service
        .create(new_experiment(ChannelTarget::Telegram, 8, true))
        .await
        .unwrap();

    let handle = service.start(&created.id, None).await.unwrap();
    assert_eq!(
        service.get(&created.id).await.unwrap().experiment.status,
        ExperimentStatus::Running
    );
    let summary = handle.await.unwrap().unwrap();

    let detail = service.get(&created.id).await.unwrap();
    assert_eq!(detail.experiment.status, ExperimentStatus::Done);
    assert_eq!(detail.event_count, 8);
    assert_eq!(summary.total_sent, 8);
    assert!(!detail.series.is_empty());
    assert_eq!(detail.experiment.summary, Some(summary));
}

#[tokio::test]
async fn test_start_reports_configuration_errors_synchronously() {
    let (_, service) = dry_service();
    let created = service
        .create(new_experiment(ChannelTarget::Telegram, 3, false))
        .await
        .unwrap();

    let err = service.start(&created.id, None).await.unwrap_err();

    match err {
        ExperimentError::MissingConfiguration(keys) => {
            assert_eq!(keys, vec!["telegram.chat_id", "telegram.bot_token"])
        }
        other => panic!("expected a configuration error, got {:?}", other),
    }
    assert_eq!(
        service.get(&created.id).await.unwrap().experiment.status,
        ExperimentStatus::Created
    );
    // The stored flag can be overridden per start.
    let handle = service.start(&created.id, Some(true)).await.unwrap();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_start_unknown_and_finished_experiments() {
    let (_, service) = dry_service();

    let err = service.start("does-not-exist", None).await.unwrap_err();
    assert!(matches!(err, ExperimentError::NotFound(_)));

    let created = service
        .create(new_experiment(ChannelTarget::Email, 1, true))
        .await
        .unwrap();
    service
        .start(&created.id, None)
        .await
        .unwrap()
        .await
        .unwrap()
        .unwrap();

    let err = service.start(&created.id, None).await.unwrap_err();
    assert!(matches!(err, ExperimentError::AlreadyFinished(_)));
}

#[tokio::test(start_paused = true)]
async fn test_delete_refuses_running_then_cascades() {
    let store = Arc::new(InMemoryStore::new());
    let runner = ExperimentRunner::new(store.clone(), configured()).with_sender(Arc::new(
        MockSender::accepting(Channel::Email).with_delay(Duration::from_secs(1)),
    ));
    let service = service(runner, store.clone());
    let created = service
        .create(new_experiment(ChannelTarget::Email, 4, false))
        .await
        .unwrap();

    let handle = service.start(&created.id, None).await.unwrap();
    let err = service.delete(&created.id).await.unwrap_err();
    assert!(matches!(err, ExperimentError::AlreadyRunning(_)));

    handle.await.unwrap().unwrap();
    service.delete(&created.id).await.unwrap();

    assert!(matches!(
        service.get(&created.id).await.unwrap_err(),
        ExperimentError::NotFound(_)
    ));
    let leftover = store
        .count_events(&EventQuery {
            experiment_id: Some(created.id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(leftover, 0);
    assert!(store.series_points(&created.id).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_list_includes_counts() {
    let (_, service) = dry_service();
    let ran = service
        .create(new_experiment(ChannelTarget::Both, 3, true))
        .await
        .unwrap();
    let idle = service
        .create(new_experiment(ChannelTarget::Email, 3, true))
        .await
        .unwrap();
    service
        .start(&ran.id, None)
        .await
        .unwrap()
        .await
        .unwrap()
        .unwrap();

    let overviews = service.list().await.unwrap();

    assert_eq!(overviews.len(), 2);
    let ran_overview = overviews
        .iter()
        .find(|o| o.experiment.id == ran.id)
        .unwrap();
    assert_eq!(ran_overview.event_count, 6);
    assert!(ran_overview.series_point_count >= 1);
    let idle_overview = overviews
        .iter()
        .find(|o| o.experiment.id == idle.id)
        .unwrap();
    assert_eq!(idle_overview.event_count, 0);
    assert_eq!(idle_overview.series_point_count, 0);
}
