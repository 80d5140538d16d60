//! Mock implementations for testing
//!
//! Provides a scripted broker connector and link, in-memory configuration
//! providers and a recording status sink so the connection manager can be
//! exercised without a broker or dashboard.

use crate::broker::endpoint::BrokerEndpoint;
use crate::broker::provider::{ConfigProvider, PersistedBrokerConfig, ProviderError};
use crate::status::{StatusError, StatusReport, StatusSink};
use crate::transport::mqtt::ConnectionState;
use crate::transport::{
    BrokerConnector, BrokerLink, ConnectSettings, IncomingMessage, LinkEvent, LinkHandle, MqttError,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rumqttc::QoS;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

pub type PublishedMessage = (String, Vec<u8>);

const LINK_EVENT_BUFFER: usize = 64;

/// What the next `connect` call should do
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Succeed,
    /// Retryable transport failure
    Refuse(String),
    /// Non-retryable configuration failure
    InvalidOptions(String),
    /// Never completes
    Hang,
}

/// Scripted [`BrokerConnector`]
///
/// Outcomes are taken from the script in order; once it is empty every
/// call uses the default outcome.
pub struct MockConnector {
    script: StdMutex<VecDeque<ConnectOutcome>>,
    default_outcome: ConnectOutcome,
    delay: Duration,
    attempts: AtomicUsize,
    endpoints: StdMutex<Vec<String>>,
    links: StdMutex<Vec<Arc<MockLink>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::with_default(ConnectOutcome::Succeed)
    }

    /// Every attempt is refused
    pub fn failing(reason: &str) -> Self {
        Self::with_default(ConnectOutcome::Refuse(reason.to_string()))
    }

    pub fn with_default(default_outcome: ConnectOutcome) -> Self {
        Self {
            script: StdMutex::new(VecDeque::new()),
            default_outcome,
            delay: Duration::ZERO,
            attempts: AtomicUsize::new(0),
            endpoints: StdMutex::new(Vec::new()),
            links: StdMutex::new(Vec::new()),
        }
    }

    pub fn with_script(self, outcomes: Vec<ConnectOutcome>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(outcomes);
        }
        self
    }

    /// Delay applied to every attempt before its outcome
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Addresses of every attempted endpoint, in order
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn links(&self) -> Vec<Arc<MockLink>> {
        self.links.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn last_link(&self) -> Option<Arc<MockLink>> {
        self.links().last().cloned()
    }

    fn next_outcome(&self) -> ConnectOutcome {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
        _settings: &ConnectSettings,
        client_id: &str,
    ) -> Result<LinkHandle, MqttError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut endpoints) = self.endpoints.lock() {
            endpoints.push(endpoint.address());
        }
        let outcome = self.next_outcome();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match outcome {
            ConnectOutcome::Succeed => {
                let (link, events) = MockLink::new(client_id);
                if let Ok(mut links) = self.links.lock() {
                    links.push(link.clone());
                }
                Ok(LinkHandle { link, events })
            }
            ConnectOutcome::Refuse(reason) => Err(MqttError::ConnectionRefused(reason)),
            ConnectOutcome::InvalidOptions(reason) => Err(MqttError::InvalidOptions(reason)),
            ConnectOutcome::Hang => {
                std::future::pending::<()>().await;
                Err(MqttError::ConnectionFailedStr("unreachable".to_string()))
            }
        }
    }
}

/// In-memory [`BrokerLink`] that records traffic and can simulate link loss
pub struct MockLink {
    client_id: String,
    open: AtomicBool,
    close_calls: AtomicUsize,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<String>>,
    events_tx: mpsc::Sender<LinkEvent>,
}

impl MockLink {
    pub fn new(client_id: &str) -> (Arc<Self>, mpsc::Receiver<LinkEvent>) {
        let (events_tx, events_rx) = mpsc::channel(LINK_EVENT_BUFFER);
        let link = Arc::new(Self {
            client_id: client_id.to_string(),
            open: AtomicBool::new(true),
            close_calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            events_tx,
        });
        (link, events_rx)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Simulate the broker dropping the connection
    pub async fn drop_connection(&self, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self
            .events_tx
            .send(LinkEvent::Closed(reason.to_string()))
            .await;
    }

    /// Simulate an incoming publish. Sent even after close, to model late events.
    pub async fn deliver(&self, topic: &str, payload: Vec<u8>) {
        let message = IncomingMessage {
            topic: topic.to_string(),
            payload: Bytes::from(payload),
            qos: QoS::AtMostOnce,
            retain: false,
            client_id: self.client_id.clone(),
            received_at: Utc::now(),
        };
        let _ = self.events_tx.send(LinkEvent::Message(message)).await;
    }

    fn check_open(&self) -> Result<(), MqttError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(MqttError::NotConnected {
                state: ConnectionState::Disconnected,
            })
        }
    }
}

#[async_trait]
impl BrokerLink for MockLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _qos: QoS,
        _retain: bool,
    ) -> Result<(), MqttError> {
        self.check_open()?;
        self.published.lock().await.push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), MqttError> {
        self.check_open()?;
        let mut subscriptions = self.subscriptions.lock().await;
        if !subscriptions.iter().any(|t| t == topic) {
            subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.check_open()?;
        self.subscriptions.lock().await.retain(|t| t != topic);
        Ok(())
    }

    async fn close(&self) -> Result<(), MqttError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Settable in-memory [`ConfigProvider`]
#[derive(Default)]
pub struct InMemoryConfigProvider {
    configs: StdMutex<Vec<PersistedBrokerConfig>>,
    failing: AtomicBool,
    delay: Option<Duration>,
    lookups: AtomicU32,
}

impl InMemoryConfigProvider {
    pub fn new(configs: Vec<PersistedBrokerConfig>) -> Self {
        Self {
            configs: StdMutex::new(configs),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_configs(&self, configs: Vec<PersistedBrokerConfig>) {
        if let Ok(mut current) = self.configs.lock() {
            *current = configs;
        }
    }

    /// Make every lookup fail with an I/O error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigProvider for InMemoryConfigProvider {
    async fn list_configs(&self) -> Result<Vec<PersistedBrokerConfig>, ProviderError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Io(std::io::Error::other(
                "configuration store unavailable",
            )));
        }
        Ok(self.configs.lock().map(|c| c.clone()).unwrap_or_default())
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

/// Provider whose lookups never complete
#[derive(Debug, Default)]
pub struct SlowConfigProvider;

#[async_trait]
impl ConfigProvider for SlowConfigProvider {
    async fn list_configs(&self) -> Result<Vec<PersistedBrokerConfig>, ProviderError> {
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }

    fn describe(&self) -> String {
        "never-responding".to_string()
    }
}

/// [`StatusSink`] that records delivered reports
#[derive(Default)]
pub struct RecordingStatusSink {
    reports: Mutex<Vec<StatusReport>>,
    calls: AtomicUsize,
    fail_remaining: AtomicU32,
    delay: Option<Duration>,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `count` deliveries
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of delivery calls, including failed ones
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().await.clone()
    }

    pub async fn states(&self) -> Vec<ConnectionState> {
        self.reports
            .lock()
            .await
            .iter()
            .map(|r| r.connection_state)
            .collect()
    }
}

#[async_trait]
impl StatusSink for RecordingStatusSink {
    async fn deliver(&self, report: &StatusReport) -> Result<(), StatusError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StatusError::Http("simulated failure".to_string()));
        }
        self.reports.lock().await.push(report.clone());
        Ok(())
    }
}
