//! Session and transition types shared by the manager and its observers

use crate::broker::endpoint::BrokerEndpoint;
use crate::broker::mode::ConfigMode;
use crate::broker::resolver::EndpointSource;
use crate::transport::mqtt::{ConnectionQuality, ConnectionState, HealthMetrics, MqttError};
use crate::transport::BrokerLink;
use chrono::{DateTime, Utc};
use rumqttc::QoS;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Terminal outcome shared by every waiter of an attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("connection failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("broker configuration rejected: {0}")]
    Configuration(String),
}

/// One established broker connection. Never re-pointed at another endpoint;
/// a reconnect produces a new session and retires this one.
pub struct ClientSession {
    client_id: String,
    endpoint: BrokerEndpoint,
    mode: ConfigMode,
    source: EndpointSource,
    attempt: u32,
    generation: u64,
    connected_at: DateTime<Utc>,
    connected_instant: Instant,
    link: Arc<dyn BrokerLink>,
    retired: AtomicBool,
}

impl ClientSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client_id: String,
        endpoint: BrokerEndpoint,
        mode: ConfigMode,
        source: EndpointSource,
        attempt: u32,
        generation: u64,
        link: Arc<dyn BrokerLink>,
    ) -> Self {
        Self {
            client_id,
            endpoint,
            mode,
            source,
            attempt,
            generation,
            connected_at: Utc::now(),
            connected_instant: Instant::now(),
            link,
            retired: AtomicBool::new(false),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn mode(&self) -> ConfigMode {
        self.mode
    }

    pub fn source(&self) -> &EndpointSource {
        &self.source
    }

    /// Attempt number that succeeded
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn uptime(&self) -> Duration {
        self.connected_instant.elapsed()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub(crate) fn link(&self) -> &Arc<dyn BrokerLink> {
        &self.link
    }

    fn check_live(&self) -> Result<(), MqttError> {
        if self.is_retired() {
            Err(MqttError::SessionRetired {
                client_id: self.client_id.clone(),
            })
        } else {
            Ok(())
        }
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.check_live()?;
        self.link.publish(topic, payload.into(), qos, retain).await
    }

    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.check_live()?;
        self.link.subscribe(topic, qos).await
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.check_live()?;
        self.link.unsubscribe(topic).await
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("client_id", &self.client_id)
            .field("endpoint", &self.endpoint.redacted_url())
            .field("mode", &self.mode)
            .field("attempt", &self.attempt)
            .field("generation", &self.generation)
            .field("retired", &self.is_retired())
            .finish()
    }
}

/// A committed state change, in commit order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub generation: u64,
    /// Redacted endpoint the transition concerns
    pub broker_url: Option<String>,
    pub mode: Option<ConfigMode>,
    pub client_id: Option<String>,
    pub attempt: u32,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Serialisable view of the manager for `/mqtt/status`
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub state: ConnectionState,
    pub generation: u64,
    pub broker_url: Option<String>,
    pub mode: Option<ConfigMode>,
    pub source: Option<EndpointSource>,
    pub client_id: Option<String>,
    pub connected_since: Option<DateTime<Utc>>,
    pub failed_attempts: u32,
    pub max_attempts: u32,
    pub total_attempts: u64,
    pub last_error: Option<String>,
    pub subscriptions: Vec<String>,
    pub metrics: HealthMetrics,
    pub quality: ConnectionQuality,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockLink;

    fn session(link: Arc<MockLink>) -> ClientSession {
        ClientSession::new(
            "gw-1".to_string(),
            BrokerEndpoint::parse("mqtt://gw:pw@broker").unwrap(),
            ConfigMode::EnvDerived,
            EndpointSource::Env,
            1,
            1,
            link,
        )
    }

    #[tokio::test]
    async fn test_publish_goes_through_link() {
        let (link, _events) = MockLink::new("gw-1");
        let session = session(link.clone());
        session
            .publish("gw/status", "online", QoS::AtLeastOnce, true)
            .await
            .unwrap();
        let published = link.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "gw/status");
    }

    #[tokio::test]
    async fn test_retired_session_rejects_operations() {
        let (link, _events) = MockLink::new("gw-1");
        let session = session(link.clone());
        session.retire();
        let err = session
            .publish("gw/status", "x", QoS::AtMostOnce, false)
            .await
            .unwrap_err();
        assert!(matches!(err, MqttError::SessionRetired { .. }));
        assert!(link.published().await.is_empty());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let (link, _events) = MockLink::new("gw-1");
        let debug = format!("{:?}", session(link));
        assert!(!debug.contains("pw@"));
        assert!(debug.contains("gw-1"));
    }

    #[test]
    fn test_session_error_is_shared_by_clone() {
        let err = SessionError::RetriesExhausted {
            attempts: 3,
            last_error: "refused".to_string(),
        };
        assert_eq!(err.clone(), err);
        assert!(err.to_string().contains("3 attempts"));
    }
}
