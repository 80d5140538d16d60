//! Single-flight connection tests
//!
//! Many callers asking for a connection at once must share one attempt and
//! one session, and attempts that finish after a teardown must not leak.


use gateway_mqtt::manager::SessionError;
use gateway_mqtt::testing::{ConnectOutcome, MockConnector};
use gateway_mqtt::transport::mqtt::ConnectionState;
use manager_helpers::{collect_transitions, env_manager, eventually};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_callers_share_one_attempt() {
    let connector = Arc::new(MockConnector::new().with_delay(Duration::from_millis(100)));
    let manager = env_manager(connector.clone(), 3);

    let mut handles = vec![];
    for _ in 0..20 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move { manager.ensure_connected().await }));
    }

    let sessions: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(connector.attempts(), 1, "only one connection attempt should be made");
    let first = &sessions[0];
    assert!(
        sessions.iter().all(|s| Arc::ptr_eq(s, first)),
        "every caller should receive the same session"
    );
    assert_eq!(manager.current_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_failure() {
    let connector = Arc::new(
        MockConnector::with_default(ConnectOutcome::InvalidOptions("bad client id".to_string()))
            .with_delay(Duration::from_millis(50)),
    );
    let manager = env_manager(connector.clone(), 3);

    let results = futures::future::join_all((0..10).map(|_| {
        let manager = manager.clone();
        async move { manager.ensure_connected().await }
    }))
    .await;

    assert_eq!(connector.attempts(), 1);
    for result in results {
        assert!(matches!(result, Err(SessionError::Configuration(_))));
    }
    assert_eq!(manager.current_state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_dropped_caller_does_not_cancel_attempt() {
    let connector = Arc::new(MockConnector::new().with_delay(Duration::from_millis(100)));
    let manager = env_manager(connector.clone(), 3);

    let impatient = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.ensure_connected().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    impatient.abort();

    let session = manager.ensure_connected().await.unwrap();
    assert_eq!(connector.attempts(), 1, "the second caller should join the original attempt");
    assert!(!session.is_retired());
}

#[tokio::test]
async fn test_late_link_is_closed_after_disconnect() {
    let connector = Arc::new(MockConnector::new().with_delay(Duration::from_millis(150)));
    let manager = env_manager(connector.clone(), 3);

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.ensure_connected().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    manager.disconnect().await;

    // The superseded waiter re-evaluates and gets a fresh attempt
    let session = waiter.await.unwrap().unwrap();
    assert_eq!(connector.attempts(), 2);

    let links = connector.links();
    assert_eq!(links.len(), 2);
    assert!(
        eventually(|| links[0].close_calls() == 1).await,
        "the link that arrived after the teardown should be closed"
    );
    assert_eq!(links[1].close_calls(), 0);
    assert_eq!(session.client_id(), links[1].client_id());
    assert_eq!(manager.metrics().get_metrics().mqtt.late_results_discarded, 1);
}

#[tokio::test]
async fn test_late_failure_is_ignored_after_reconnect() {
    let connector = Arc::new(
        MockConnector::new()
            .with_script(vec![ConnectOutcome::Refuse("connection refused".to_string())])
            .with_delay(Duration::from_millis(150)),
    );
    let manager = env_manager(connector.clone(), 3);
    let mut transitions = manager.subscribe_transitions();

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.ensure_connected().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let session = manager.reconnect().await.unwrap();
    let joined = waiter.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&session, &joined));
    assert_eq!(connector.attempts(), 2);
    assert_eq!(manager.current_state(), ConnectionState::Connected);

    assert!(
        eventually(|| manager.metrics().get_metrics().mqtt.late_results_discarded == 1).await,
        "the refusal of the abandoned attempt should be discarded"
    );
    let states: Vec<_> = collect_transitions(&mut transitions, 5)
        .await
        .into_iter()
        .map(|t| t.to)
        .collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
    assert_eq!(manager.snapshot().await.failed_attempts, 0);
    assert_eq!(manager.current_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_concurrent_disconnects_close_once() {
    let connector = Arc::new(MockConnector::new());
    let manager = env_manager(connector.clone(), 3);
    manager.ensure_connected().await.unwrap();

    futures::future::join_all((0..5).map(|_| manager.disconnect())).await;

    let link = connector.last_link().unwrap();
    assert_eq!(link.close_calls(), 1);
    assert_eq!(manager.current_state(), ConnectionState::Disconnected);
    assert!(manager.current_session().await.is_none());
}
