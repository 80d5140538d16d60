//! Pure health monitoring logic for the connection manager
//!
//! This module contains pure functions for validating and logging state
//! transitions and deriving connection health metrics.

use super::connection::ConnectionState;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// Pure health monitoring decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Whether the manager may move from `from` to `to` (pure function)
    pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
        use ConnectionState::*;
        match (from, to) {
            (a, b) if a == b => true,
            // Any state can be torn down
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Connecting | Reconnecting, Connected | Reconnecting | Failed) => true,
            (Connected, Reconnecting) => true,
            _ => false,
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(
        from: ConnectionState,
        to: ConnectionState,
        endpoint: Option<&str>,
        reason: Option<&str>,
    ) {
        let endpoint = endpoint.unwrap_or("-");
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!(endpoint = %endpoint, "MQTT connection established successfully");
            }
            (ConnectionState::Reconnecting, ConnectionState::Connected) => {
                info!(endpoint = %endpoint, "Reconnection successful");
            }
            (ConnectionState::Connected, ConnectionState::Reconnecting) => {
                warn!(endpoint = %endpoint, reason = reason.unwrap_or("unknown"), "MQTT connection lost");
            }
            (_, ConnectionState::Reconnecting) => {
                warn!(endpoint = %endpoint, reason = reason.unwrap_or("unknown"), "MQTT connection attempt failed, retrying");
            }
            (_, ConnectionState::Failed) => {
                error!(endpoint = %endpoint, reason = reason.unwrap_or("unknown"), "MQTT connection permanently failed");
            }
            _ => {
                info!(endpoint = %endpoint, "MQTT connection state: {} -> {}", from, to);
            }
        }
    }

    /// Calculate health metrics for the connection (pure function)
    pub fn calculate_health_metrics(
        state: ConnectionState,
        uptime: Option<Duration>,
        session_losses: u32,
        failed_attempts: u32,
    ) -> HealthMetrics {
        HealthMetrics {
            uptime,
            session_losses,
            failed_attempts,
            is_healthy: state.is_connected() && uptime.is_some(),
        }
    }

    /// Assess connection quality based on metrics (pure function)
    pub fn assess_connection_quality(metrics: &HealthMetrics) -> ConnectionQuality {
        if !metrics.is_healthy {
            return ConnectionQuality::Critical;
        }

        match (metrics.session_losses, metrics.uptime) {
            // No drops, good uptime
            (0, Some(uptime)) if uptime > Duration::from_secs(3600) => ConnectionQuality::Excellent,
            (0, Some(_)) => ConnectionQuality::Good,

            // Few drops
            (1..=2, Some(uptime)) if uptime > Duration::from_secs(1800) => ConnectionQuality::Good,
            (1..=2, Some(_)) => ConnectionQuality::Fair,

            (3..=5, _) => ConnectionQuality::Fair,
            (6..=10, _) => ConnectionQuality::Poor,

            _ => ConnectionQuality::Critical,
        }
    }
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMetrics {
    /// Time since the live session was established
    pub uptime: Option<Duration>,
    /// Established sessions lost since start
    pub session_losses: u32,
    /// Consecutive failed attempts for the current endpoint
    pub failed_attempts: u32,
    pub is_healthy: bool,
}

/// Connection quality assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    /// Stable connection for over an hour
    Excellent,
    Good,
    /// Some drops, but working
    Fair,
    /// Frequent drops
    Poor,
    /// Not connected or failing constantly
    Critical,
}
