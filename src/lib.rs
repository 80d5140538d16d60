//! Gateway MQTT - connection manager for the IoT gateway dashboard
//!
//! Owns the gateway's single MQTT broker connection and keeps it pointed at
//! the broker the dashboard currently selects.
//!
//! # Overview
//!
//! - [`broker`] - endpoint parsing, mode selection, persisted configuration
//!   providers and endpoint resolution with fallback
//! - [`transport`] - raw-socket downgrade, `rumqttc` links, reconnect policy
//! - [`manager`] - the single-flight [`ConnectionManager`]
//! - [`status`] - non-blocking status reporting to the dashboard
//! - [`health`] - bounded-latency health probe
//! - [`observability`] - logging, metrics and the HTTP health surface
//! - [`runtime`] - composition root used by the binary
//!
//! # Quick Start
//!
//! ```rust
//! use gateway_mqtt::broker::BrokerEndpoint;
//! use gateway_mqtt::transport::TransportNegotiator;
//!
//! let endpoint = BrokerEndpoint::parse("ws://broker.local:9001/mqtt").unwrap();
//! let negotiated = TransportNegotiator::default().negotiate(&endpoint);
//! assert_eq!(negotiated.address(), "mqtt://broker.local:9001");
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod observability;
pub mod runtime;
pub mod status;
pub mod testing;
pub mod transport;

pub use broker::{BrokerEndpoint, ConfigMode};
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use health::{HealthProbe, HealthStatus, ProbeReport};
pub use manager::{ClientSession, ConnectionManager, SessionError, StateTransition};
pub use runtime::GatewayRuntime;
pub use transport::mqtt::ConnectionState;
