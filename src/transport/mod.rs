//! Transport layer for the gateway's broker connection
//!
//! [`BrokerConnector`] opens one link per attempt; [`BrokerLink`] is the
//! publish/subscribe handle for an established link. The manager only talks
//! to these traits so tests can drive it without a broker.

use crate::broker::endpoint::BrokerEndpoint;
use async_trait::async_trait;
use rumqttc::QoS;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod mqtt;
pub mod negotiator;

pub use mqtt::connection::{ConnectSettings, MqttError};
pub use mqtt::message_handler::IncomingMessage;
pub use negotiator::TransportNegotiator;

/// Events emitted by an established link
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Publish received on a subscribed topic
    Message(IncomingMessage),
    /// Link is gone (broker disconnect, network or protocol error)
    Closed(String),
}

/// An established link and its event stream
pub struct LinkHandle {
    pub link: Arc<dyn BrokerLink>,
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Opens broker links
///
/// `connect` resolves once the broker has acknowledged the connection, or
/// fails with a transport or configuration error.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
        settings: &ConnectSettings,
        client_id: &str,
    ) -> Result<LinkHandle, MqttError>;
}

/// Publish/subscribe handle over an established link
#[async_trait]
pub trait BrokerLink: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError>;

    /// Close the link. Calling it more than once is harmless.
    async fn close(&self) -> Result<(), MqttError>;

    fn is_open(&self) -> bool;
}
