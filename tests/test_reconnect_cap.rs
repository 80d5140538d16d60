//! Reconnect cap and recovery tests
//!
//! Consecutive failures are bounded by the policy; once exhausted the manager
//! stays `Failed` until something explicitly clears it.


use gateway_mqtt::broker::{ConfigMode, InMemoryModeSelector};
use gateway_mqtt::manager::{ConnectionManager, SessionError};
use gateway_mqtt::observability::MetricsCollector;
use gateway_mqtt::status::reporter::DeliveryOptions;
use gateway_mqtt::status::StatusReporter;
use gateway_mqtt::testing::{
    ConnectOutcome, MockConnector, RecordingStatusSink, SlowConfigProvider,
};
use gateway_mqtt::transport::mqtt::{ConnectionState, ReconnectAction};
use manager_helpers::{collect_transitions, env_manager, fast_policy, resolver};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn refused() -> ConnectOutcome {
    ConnectOutcome::Refuse("connection refused".to_string())
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let connector = Arc::new(MockConnector::failing("connection refused"));
    let manager = env_manager(connector.clone(), 4);

    let err = manager.ensure_connected().await.unwrap_err();
    match err {
        SessionError::RetriesExhausted { attempts, last_error } => {
            assert_eq!(attempts, 4);
            assert!(last_error.contains("refused"));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(connector.attempts(), 4);
    assert_eq!(manager.current_state(), ConnectionState::Failed);

    // Failed is sticky: no new attempts until cleared
    assert!(manager.ensure_connected().await.is_err());
    assert_eq!(connector.attempts(), 4);
}

#[tokio::test]
async fn test_recovers_within_attempt_budget() {
    let connector = Arc::new(MockConnector::new().with_script(vec![refused(), refused()]));
    let manager = env_manager(connector.clone(), 3);
    let mut transitions = manager.subscribe_transitions();

    let session = manager.ensure_connected().await.unwrap();
    assert_eq!(connector.attempts(), 3);
    assert_eq!(session.attempt(), 3);

    let states: Vec<_> = collect_transitions(&mut transitions, 4)
        .await
        .into_iter()
        .map(|t| t.to)
        .collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Reconnecting,
            ConnectionState::Reconnecting,
            ConnectionState::Connected,
        ]
    );
}

#[tokio::test]
async fn test_failed_manager_does_not_wait_on_store() {
    let modes = Arc::new(InMemoryModeSelector::new(ConfigMode::EnvDerived));
    let manager = ConnectionManager::builder(
        resolver(Some(Arc::new(SlowConfigProvider)), Duration::from_secs(10)),
        Arc::new(MockConnector::failing("connection refused")),
        modes.clone(),
    )
    .policy(fast_policy(2))
    .build();

    assert!(manager.ensure_connected().await.is_err());
    modes.set(ConfigMode::PersistedDerived).await;

    let err = tokio::time::timeout(Duration::from_millis(500), manager.ensure_connected())
        .await
        .expect("a failed manager answers without resolving")
        .unwrap_err();
    assert!(matches!(err, SessionError::RetriesExhausted { attempts: 2, .. }));
}

#[tokio::test]
async fn test_reset_then_connect_succeeds() {
    let connector = Arc::new(MockConnector::new().with_script(vec![refused(), refused(), refused()]));
    let manager = env_manager(connector.clone(), 3);

    assert!(manager.ensure_connected().await.is_err());
    assert!(manager.reset().await);
    assert_eq!(manager.current_state(), ConnectionState::Disconnected);

    manager.ensure_connected().await.unwrap();
    assert_eq!(connector.attempts(), 4);
    assert!(!manager.reset().await, "reset is a no-op unless Failed");
}

#[tokio::test]
async fn test_reconnect_clears_failure() {
    let connector = Arc::new(MockConnector::new().with_script(vec![refused(), refused()]));
    let manager = env_manager(connector.clone(), 2);

    assert!(manager.ensure_connected().await.is_err());
    let session = manager.reconnect().await.unwrap();
    assert_eq!(session.attempt(), 1);
    assert_eq!(manager.snapshot().await.failed_attempts, 0);
}

#[tokio::test]
async fn test_status_reports_follow_commit_order() {
    let connector = Arc::new(MockConnector::failing("connection refused"));
    let sink = Arc::new(RecordingStatusSink::new());
    let metrics = Arc::new(MetricsCollector::new());
    let options = DeliveryOptions {
        coalesce: false,
        ..DeliveryOptions::default()
    };
    let (reporter, reporter_task) = StatusReporter::spawn(sink.clone(), options, metrics.clone());

    let manager = ConnectionManager::builder(
        resolver(None, Duration::from_millis(100)),
        connector,
        Arc::new(InMemoryModeSelector::new(ConfigMode::EnvDerived)),
    )
    .policy(fast_policy(3))
    .reporter(reporter)
    .metrics(metrics.clone())
    .build();

    assert!(manager.ensure_connected().await.is_err());
    drop(manager);
    tokio::time::timeout(Duration::from_secs(1), reporter_task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        sink.states().await,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Reconnecting,
            ConnectionState::Reconnecting,
            ConnectionState::Failed,
        ]
    );
    let reports = sink.reports().await;
    let last = reports.last().unwrap();
    assert!(!last.is_connected);
    assert_eq!(last.broker_url.as_deref(), Some("mqtt://env-broker:1883"));
    assert_eq!(metrics.get_metrics().mqtt.retries_exhausted, 1);
}

#[tokio::test]
async fn test_slow_status_sink_does_not_block_connect() {
    let sink = Arc::new(RecordingStatusSink::new().with_delay(Duration::from_secs(5)));
    let metrics = Arc::new(MetricsCollector::new());
    let (reporter, reporter_task) =
        StatusReporter::spawn(sink.clone(), DeliveryOptions::default(), metrics.clone());

    let manager = ConnectionManager::builder(
        resolver(None, Duration::from_millis(100)),
        Arc::new(MockConnector::new()),
        Arc::new(InMemoryModeSelector::new(ConfigMode::EnvDerived)),
    )
    .reporter(reporter)
    .metrics(metrics)
    .build();

    tokio::time::timeout(Duration::from_millis(500), manager.ensure_connected())
        .await
        .expect("connect must not wait on status delivery")
        .unwrap();
    reporter_task.abort();
}

proptest! {
    #[test]
    fn prop_policy_retries_until_cap(max_attempts in 1u32..20, failed in 1u32..40) {
        let policy = fast_policy(max_attempts);
        let action = policy.on_attempt_failed(failed);
        if failed >= max_attempts {
            prop_assert_eq!(action, ReconnectAction::GiveUp);
        } else {
            prop_assert_eq!(action, ReconnectAction::RetryAfter(Duration::from_millis(10)));
        }
    }
}
