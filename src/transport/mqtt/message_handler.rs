//! Pure routing of `rumqttc` events
//!
//! The event loop task asks [`MessageHandler::route_mqtt_event`] what each
//! event means and acts on the answer; nothing here performs I/O.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, QoS, SubscribeReasonCode};
use serde::Serialize;

/// A publish received on a subscribed topic
#[derive(Debug, Clone, Serialize)]
pub struct IncomingMessage {
    pub topic: String,
    #[serde(serialize_with = "serialize_payload")]
    pub payload: Bytes,
    #[serde(serialize_with = "serialize_qos")]
    pub qos: QoS,
    pub retain: bool,
    /// Client id of the session that received it
    pub client_id: String,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

fn serialize_payload<S: serde::Serializer>(payload: &Bytes, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(payload))
}

fn serialize_qos<S: serde::Serializer>(qos: &QoS, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u8(*qos as u8)
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => {
                    EventRoute::ConnectionAcknowledged {
                        session_present: ack.session_present,
                    }
                }
                Packet::ConnAck(ack) => EventRoute::ConnectionRefused(format!("{:?}", ack.code)),
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    qos: publish.qos,
                    retain: publish.retain,
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    rejected: suback
                        .return_codes
                        .iter()
                        .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                        .count(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::ClientDisconnect,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(packet_id: u16, rejected: usize) -> Result<(), String> {
        if rejected > 0 {
            Err(format!(
                "Broker rejected {rejected} topic filter(s) in subscription {packet_id}"
            ))
        } else {
            Ok(())
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged { session_present: bool },
    /// Broker answered CONNECT with a non-success code
    ConnectionRefused(String),
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    },
    /// Broker sent DISCONNECT
    Disconnected,
    /// Our own DISCONNECT went out
    ClientDisconnect,
    /// Subscription confirmed; `rejected` counts refused filters
    SubscriptionConfirmed { packet_id: u16, rejected: usize },
    /// Infrastructure event (PingResp, PubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, Publish, SubAck};

    #[test]
    fn test_route_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::ConnectionAcknowledged {
                session_present: false
            }
        );

        let refused = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::NotAuthorized,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&refused),
            EventRoute::ConnectionRefused(_)
        ));
    }

    #[test]
    fn test_route_publish() {
        let publish = Publish::new("devices/1/telemetry", QoS::AtLeastOnce, "21.5");
        let event = Event::Incoming(Packet::Publish(publish));
        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::MessageReceived {
                topic,
                payload,
                qos,
                retain,
            } => {
                assert_eq!(topic, "devices/1/telemetry");
                assert_eq!(&payload[..], b"21.5");
                assert_eq!(qos, QoS::AtLeastOnce);
                assert!(!retain);
            }
            other => panic!("unexpected route {other:?}"),
        }
    }

    #[test]
    fn test_route_disconnects() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Disconnect)),
            EventRoute::Disconnected
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::ClientDisconnect
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        );
    }

    #[test]
    fn test_route_suback() {
        let suback = SubAck::new(
            7,
            vec![
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::Failure,
            ],
        );
        let route = MessageHandler::route_mqtt_event(&Event::Incoming(Packet::SubAck(suback)));
        assert_eq!(
            route,
            EventRoute::SubscriptionConfirmed {
                packet_id: 7,
                rejected: 1
            }
        );
        assert!(MessageHandler::validate_subscription_success(7, 1).is_err());
        assert!(MessageHandler::validate_subscription_success(7, 0).is_ok());
    }

    #[test]
    fn test_route_infrastructure() {
        let route = MessageHandler::route_mqtt_event(&Event::Incoming(Packet::PingResp));
        assert!(matches!(route, EventRoute::InfrastructureEvent(_)));
    }
}
