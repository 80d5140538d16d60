//! Pure connection state management for the gateway's MQTT client
//!
//! This module contains pure functions for connection state, error
//! classification and building `rumqttc` options from an endpoint.

use crate::broker::endpoint::{BrokerEndpoint, Scheme};
use crate::config::{LastWillSection, MqttSection};
use rumqttc::{LastWill, MqttOptions, QoS, Transport as RumqttcTransport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Connection state of the manager. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session and no attempt in flight
    #[default]
    Disconnected,
    /// First attempt for an endpoint is in flight
    Connecting,
    /// A live session exists
    Connected,
    /// Retrying after a failed attempt or a lost session
    Reconnecting,
    /// Retries exhausted or configuration rejected; needs an explicit reset
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Connecting or Reconnecting
    pub fn is_attempting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Broker refused connection: {0}")]
    ConnectionRefused(String),
    #[error("No CONNACK from broker within {0:?}")]
    ConnAckTimeout(Duration),
    #[error("Publishing failed: {0}")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid client options: {0}")]
    InvalidOptions(String),
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },
    #[error("Session {client_id} has been retired")]
    SessionRetired { client_id: String },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

impl MqttError {
    /// Transport-level failures are retried; configuration problems are not
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            MqttError::InvalidBrokerUrl(_) | MqttError::InvalidOptions(_)
        )
    }
}

/// Per-attempt client settings derived from `[mqtt]`
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub client_id_prefix: String,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub connect_timeout: Duration,
    pub max_packet_size: usize,
    /// Capacity of the rumqttc request channel
    pub request_capacity: usize,
    pub last_will: Option<LastWillSection>,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self::from_section(&MqttSection::default())
    }
}

impl ConnectSettings {
    pub fn from_section(section: &MqttSection) -> Self {
        Self {
            client_id_prefix: section.client_id_prefix.clone(),
            keep_alive: Duration::from_secs(section.keep_alive_secs),
            clean_session: section.clean_session,
            connect_timeout: section.connect_timeout(),
            max_packet_size: section.max_packet_size,
            request_capacity: 64,
            last_will: section.last_will.clone(),
        }
    }

    /// Generate a unique client id for a single attempt
    pub fn generate_client_id(&self) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.client_id_prefix, &suffix[..12])
    }
}

/// Map a numeric QoS level
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Pure function to build `rumqttc` options for one attempt
pub fn configure_mqtt_options(
    endpoint: &BrokerEndpoint,
    settings: &ConnectSettings,
    client_id: &str,
) -> Result<MqttOptions, MqttError> {
    if endpoint.host.is_empty() {
        return Err(MqttError::InvalidBrokerUrl(endpoint.redacted_url()));
    }
    if client_id.is_empty() {
        return Err(MqttError::InvalidOptions(
            "client id must not be empty".to_string(),
        ));
    }
    if settings.keep_alive < Duration::from_secs(1) {
        return Err(MqttError::InvalidOptions(
            "keep alive must be at least one second".to_string(),
        ));
    }

    // rumqttc takes the full URL as "host" for websocket transports
    let host = if endpoint.scheme.is_websocket() {
        endpoint.address()
    } else {
        endpoint.host.clone()
    };
    let mut mqtt_options = MqttOptions::new(client_id, host, endpoint.port);

    match endpoint.scheme {
        Scheme::Mqtt => {}
        Scheme::Mqtts => {
            mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
        }
        Scheme::Ws => {
            mqtt_options.set_transport(RumqttcTransport::Ws);
        }
        Scheme::Wss => {
            mqtt_options.set_transport(RumqttcTransport::wss_with_default_config());
        }
    }

    if let Some(credentials) = &endpoint.credentials {
        mqtt_options.set_credentials(
            credentials.username.clone(),
            credentials.password.clone().unwrap_or_default(),
        );
    }

    mqtt_options.set_keep_alive(settings.keep_alive);
    mqtt_options.set_clean_session(settings.clean_session);
    mqtt_options.set_max_packet_size(settings.max_packet_size, settings.max_packet_size);

    if let Some(will) = &settings.last_will {
        let qos = qos_from_level(will.qos).ok_or_else(|| {
            MqttError::InvalidOptions(format!("last will QoS {} is not 0, 1 or 2", will.qos))
        })?;
        mqtt_options.set_last_will(LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            qos,
            will.retain,
        ));
    }

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::endpoint::Credentials;

    fn endpoint(url: &str) -> BrokerEndpoint {
        BrokerEndpoint::parse(url).unwrap()
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(ConnectionState::Reconnecting.is_attempting());
        assert!(!ConnectionState::Failed.is_attempting());
    }

    #[test]
    fn test_configure_plain_options() {
        let settings = ConnectSettings::default();
        let options = configure_mqtt_options(
            &endpoint("mqtt://broker.local:1884"),
            &settings,
            "gw-abc",
        )
        .unwrap();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.client_id(), "gw-abc");
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(options.clean_session());
        assert!(options.credentials().is_none());
    }

    #[test]
    fn test_configure_credentials_and_will() {
        let mut settings = ConnectSettings::default();
        settings.last_will = Some(LastWillSection {
            topic: "gateway/status".to_string(),
            payload: "offline".to_string(),
            qos: 1,
            retain: true,
        });
        let ep = endpoint("mqtt://broker")
            .with_fallback_credentials(Some(Credentials::new("gw", Some("pw".to_string()))));

        let options = configure_mqtt_options(&ep, &settings, "gw-1").unwrap();
        assert_eq!(
            options.credentials(),
            Some(("gw".to_string(), "pw".to_string()))
        );
        assert_eq!(options.last_will().unwrap().topic, "gateway/status");
    }

    #[test]
    fn test_websocket_uses_full_url() {
        let options = configure_mqtt_options(
            &endpoint("ws://host:9000/mqtt"),
            &ConnectSettings::default(),
            "gw-1",
        )
        .unwrap();
        assert_eq!(
            options.broker_address(),
            ("ws://host:9000/mqtt".to_string(), 9000)
        );
    }

    #[test]
    fn test_invalid_options_not_retryable() {
        let mut settings = ConnectSettings::default();
        settings.keep_alive = Duration::from_millis(10);
        let err = configure_mqtt_options(&endpoint("mqtt://h"), &settings, "gw-1").unwrap_err();
        assert!(!err.is_retryable());

        let err = configure_mqtt_options(&endpoint("mqtt://h"), &ConnectSettings::default(), "")
            .unwrap_err();
        assert!(matches!(err, MqttError::InvalidOptions(_)));
    }

    #[test]
    fn test_transport_errors_retryable() {
        assert!(MqttError::ConnAckTimeout(Duration::from_secs(1)).is_retryable());
        assert!(MqttError::ConnectionRefused("bad credentials".to_string()).is_retryable());
        assert!(MqttError::ConnectionFailedStr("reset".to_string()).is_retryable());
        assert!(!MqttError::InvalidBrokerUrl("x".to_string()).is_retryable());
    }

    #[test]
    fn test_client_ids_unique() {
        let settings = ConnectSettings::default();
        let a = settings.generate_client_id();
        let b = settings.generate_client_id();
        assert_ne!(a, b);
        assert!(a.starts_with("iot-gateway-"));
        assert_eq!(a.len(), "iot-gateway-".len() + 12);
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0), Some(QoS::AtMostOnce));
        assert_eq!(qos_from_level(2), Some(QoS::ExactlyOnce));
        assert_eq!(qos_from_level(3), None);
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("test".to_string().into()),
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::InvalidBrokerUrl("test".to_string()),
            MqttError::NotConnected {
                state: ConnectionState::Disconnected,
            },
            MqttError::SessionRetired {
                client_id: "gw-1".to_string(),
            },
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
