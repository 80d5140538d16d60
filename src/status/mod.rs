//! Connection status propagation
//!
//! Every committed state transition becomes a [`StatusReport`] handed to the
//! [`StatusReporter`], which delivers it to a [`StatusSink`] from a detached
//! task. Reporting never blocks the connection manager.

pub mod reporter;
pub mod sinks;

pub use reporter::StatusReporter;
pub use sinks::{HttpStatusSink, LogStatusSink};

use crate::broker::mode::ConfigMode;
use crate::error::sanitize_error_message;
use crate::manager::StateTransition;
use crate::transport::mqtt::ConnectionState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Payload posted to the dashboard on every state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub is_connected: bool,
    pub connection_state: ConnectionState,
    /// Credentials are redacted
    pub broker_url: Option<String>,
    pub mode: Option<ConfigMode>,
    pub client_id: Option<String>,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusReport {
    pub fn from_transition(transition: &StateTransition) -> Self {
        Self {
            is_connected: transition.to.is_connected(),
            connection_state: transition.to,
            broker_url: transition.broker_url.clone(),
            mode: transition.mode,
            client_id: transition.client_id.clone(),
            attempt: transition.attempt,
            detail: transition.reason.as_deref().map(sanitize_error_message),
            timestamp: transition.at,
        }
    }
}

/// Status delivery errors
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status request failed: {0}")]
    Http(String),
    #[error("status endpoint rejected report with status {0}")]
    Rejected(u16),
    #[error("status delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Destination for status reports. Delivery must be idempotent.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn deliver(&self, report: &StatusReport) -> Result<(), StatusError>;
}
