//! Impure I/O operations for the MQTT link
//!
//! [`RumqttcConnector`] opens one `rumqttc` client per attempt, waits for the
//! CONNACK and then hands the event loop to a background task that forwards
//! publishes and reports the link's end exactly once.

use super::connection::{configure_mqtt_options, ConnectSettings, ConnectionState, MqttError};
use super::message_handler::{EventRoute, IncomingMessage, MessageHandler};
use crate::broker::endpoint::BrokerEndpoint;
use crate::transport::{BrokerConnector, BrokerLink, LinkEvent, LinkHandle};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Time allowed for the event loop task to finish after DISCONNECT
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Production connector backed by `rumqttc`
#[derive(Debug, Clone)]
pub struct RumqttcConnector {
    event_buffer: usize,
}

impl Default for RumqttcConnector {
    fn default() -> Self {
        Self { event_buffer: 256 }
    }
}

impl RumqttcConnector {
    pub fn new(event_buffer: usize) -> Self {
        Self {
            event_buffer: event_buffer.max(1),
        }
    }

    /// Poll the event loop until the broker acknowledges the connection
    async fn wait_for_connection_confirmation(
        event_loop: &mut EventLoop,
        timeout: Duration,
    ) -> Result<bool, MqttError> {
        let result = tokio::time::timeout(timeout, async {
            loop {
                match event_loop.poll().await {
                    Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                        EventRoute::ConnectionAcknowledged { session_present } => {
                            return Ok(session_present);
                        }
                        EventRoute::ConnectionRefused(code) => {
                            return Err(MqttError::ConnectionRefused(code));
                        }
                        _ => continue,
                    },
                    Err(ConnectionError::ConnectionRefused(code)) => {
                        return Err(MqttError::ConnectionRefused(format!("{code:?}")));
                    }
                    Err(e) => return Err(MqttError::ConnectionFailed(Box::new(e))),
                }
            }
        })
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(MqttError::ConnAckTimeout(timeout)),
        }
    }
}

#[async_trait]
impl BrokerConnector for RumqttcConnector {
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
        settings: &ConnectSettings,
        client_id: &str,
    ) -> Result<LinkHandle, MqttError> {
        let mqtt_options = configure_mqtt_options(endpoint, settings, client_id)?;
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, settings.request_capacity);

        let session_present =
            Self::wait_for_connection_confirmation(&mut event_loop, settings.connect_timeout)
                .await?;
        debug!(
            client_id = %client_id,
            endpoint = %endpoint,
            session_present,
            "Broker acknowledged connection"
        );

        let (events_tx, events_rx) = mpsc::channel(self.event_buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_event_loop(
            client_id.to_string(),
            event_loop,
            events_tx,
            shutdown_rx,
        ));

        let link = RumqttcLink {
            client,
            client_id: client_id.to_string(),
            closed: AtomicBool::new(false),
            shutdown_tx,
            event_loop_handle: Mutex::new(Some(handle)),
        };

        Ok(LinkHandle {
            link: Arc::new(link),
            events: events_rx,
        })
    }
}

/// Drive the event loop until shutdown, client disconnect or error.
/// Sends `LinkEvent::Closed` once unless the close was requested locally.
async fn run_event_loop(
    client_id: String,
    mut event_loop: EventLoop,
    events_tx: mpsc::Sender<LinkEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let close_reason = loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!(client_id = %client_id, "Event loop received shutdown signal");
                    break None;
                }
            }
            polled = event_loop.poll() => {
                match polled {
                    Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                        EventRoute::MessageReceived { topic, payload, qos, retain } => {
                            let message = IncomingMessage {
                                topic,
                                payload,
                                qos,
                                retain,
                                client_id: client_id.clone(),
                                received_at: chrono::Utc::now(),
                            };
                            if let Err(e) = events_tx.try_send(LinkEvent::Message(message)) {
                                warn!(client_id = %client_id, error = %e, "Dropping incoming message, consumer is behind");
                            }
                        }
                        EventRoute::Disconnected => {
                            break Some("broker sent DISCONNECT".to_string());
                        }
                        EventRoute::ClientDisconnect => {
                            debug!(client_id = %client_id, "Client DISCONNECT sent");
                            break None;
                        }
                        EventRoute::SubscriptionConfirmed { packet_id, rejected } => {
                            if let Err(e) = MessageHandler::validate_subscription_success(packet_id, rejected) {
                                warn!(client_id = %client_id, "{}", e);
                            }
                        }
                        EventRoute::InfrastructureEvent(desc) => {
                            debug!(client_id = %client_id, event = %desc, "MQTT infrastructure event");
                        }
                        _ => {}
                    },
                    Err(e) => {
                        error!(client_id = %client_id, error = %e, "MQTT event loop error");
                        break Some(e.to_string());
                    }
                }
            }
        }
    };

    if let Some(reason) = close_reason {
        if events_tx.send(LinkEvent::Closed(reason)).await.is_err() {
            debug!(client_id = %client_id, "Link watcher already gone");
        }
    }
}

/// Link over a `rumqttc` client
pub struct RumqttcLink {
    client: AsyncClient,
    client_id: String,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RumqttcLink {
    fn check_open(&self) -> Result<(), MqttError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(MqttError::NotConnected {
                state: ConnectionState::Disconnected,
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerLink for RumqttcLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.check_open()?;
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.check_open()?;
        self.client
            .subscribe(topic, qos)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.check_open()?;
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))
    }

    async fn close(&self) -> Result<(), MqttError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Best effort; the event loop may already be gone
        if let Err(e) = self.client.try_disconnect() {
            debug!(client_id = %self.client_id, error = %e, "DISCONNECT request not queued");
            let _ = self.shutdown_tx.send(true);
        }

        if let Some(handle) = self.event_loop_handle.lock().await.take() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {
                    info!(client_id = %self.client_id, "MQTT link closed gracefully");
                }
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(client_id = %self.client_id, "Event loop task ended with error: {}", e);
                }
                Err(_) => {
                    warn!(client_id = %self.client_id, "Event loop task didn't shut down gracefully, forcing abort");
                    let _ = self.shutdown_tx.send(true);
                    abort.abort();
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for RumqttcLink {
    fn drop(&mut self) {
        // Background task cleanup only; graceful close needs close()
        let _ = self.shutdown_tx.send(true);
        if let Ok(mut guard) = self.event_loop_handle.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        let connector = RumqttcConnector::default();
        // Port 1 on localhost is essentially never listening
        let endpoint = BrokerEndpoint::parse("mqtt://127.0.0.1:1").unwrap();
        let settings = ConnectSettings {
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        };

        let result = connector.connect(&endpoint, &settings, "gw-test").await;
        let err = result.err().unwrap();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_options() {
        let connector = RumqttcConnector::default();
        let endpoint = BrokerEndpoint::parse("mqtt://127.0.0.1:1883").unwrap();
        let settings = ConnectSettings {
            keep_alive: Duration::from_millis(1),
            ..Default::default()
        };

        let err = connector
            .connect(&endpoint, &settings, "gw-test")
            .await
            .err()
            .unwrap();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_event_loop_stops_on_shutdown() {
        let options = rumqttc::MqttOptions::new("gw-test", "127.0.0.1", 1);
        let (_client, event_loop) = AsyncClient::new(options, 10);
        let (events_tx, mut events_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_event_loop(
            "gw-test".to_string(),
            event_loop,
            events_tx,
            shutdown_rx,
        ));
        shutdown_tx.send(true).unwrap();

        let _ = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap();
        // Either the shutdown won the race (no event) or the refused
        // connection surfaced first as a Closed event
        if let Ok(event) = events_rx.try_recv() {
            assert!(matches!(event, LinkEvent::Closed(_)));
        }
    }
}
