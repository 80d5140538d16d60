//! MQTT 3.1.1 transport over `rumqttc`
//!
//! Pure logic is kept apart from I/O:
//!
//! - [`connection`] - connection state, errors and option building
//! - [`message_handler`] - routing of `rumqttc` events
//! - [`health_monitor`] - transition validation and health metrics
//! - [`reconnect`] - retry cadence and termination
//! - [`client`] - the `rumqttc`-backed connector and link

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod reconnect;

pub use client::{RumqttcConnector, RumqttcLink};
pub use connection::{configure_mqtt_options, ConnectSettings, ConnectionState, MqttError};
pub use health_monitor::{ConnectionQuality, HealthMetrics, HealthMonitor};
pub use message_handler::{EventRoute, IncomingMessage, MessageHandler};
pub use reconnect::{BackoffStrategy, ReconnectAction, ReconnectConfig, ReconnectPolicy};
