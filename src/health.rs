//! Bounded-latency health probe over the connection manager
//!
//! [`HealthProbe`] classifies the MQTT connection as healthy, degraded or
//! unhealthy and always answers within its deadline; an evaluation that
//! overruns is abandoned and reported as degraded. [`HealthCheck`] and
//! [`HealthCheckManager`] aggregate component checks for the HTTP surface.

use crate::broker::mode::ConfigMode;
use crate::manager::ConnectionManager;
use crate::observability::metrics::MetricsCollector;
use crate::transport::mqtt::ConnectionState;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tri-state health classification, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// Worst of the two
    pub fn combine(self, other: HealthStatus) -> HealthStatus {
        std::cmp::max(self, other)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one MQTT probe
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub status: HealthStatus,
    pub detail: String,
    pub state: ConnectionState,
    pub broker_url: Option<String>,
    pub mode: Option<ConfigMode>,
    pub elapsed_ms: u64,
    pub timed_out: bool,
}

/// MQTT health probe with a fixed deadline
#[derive(Clone)]
pub struct HealthProbe {
    manager: Arc<ConnectionManager>,
    deadline: Duration,
}

impl HealthProbe {
    pub fn new(manager: Arc<ConnectionManager>, deadline: Duration) -> Self {
        Self { manager, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn check(&self) -> ProbeReport {
        self.check_within(self.deadline).await
    }

    /// Evaluate with an explicit deadline. Never fails and never overruns.
    pub async fn check_within(&self, deadline: Duration) -> ProbeReport {
        let started = Instant::now();
        let manager = self.manager.clone();
        let mut evaluation = tokio::spawn(async move { evaluate(&manager).await });

        let mut report = match tokio::time::timeout(deadline, &mut evaluation).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                warn!(error = %e, "Health evaluation task failed");
                self.unevaluated(HealthStatus::Unhealthy, format!("health evaluation failed: {e}"))
            }
            Err(_) => {
                evaluation.abort();
                warn!(deadline_ms = deadline.as_millis() as u64, "MQTT health check timed out");
                let mut report = self.unevaluated(
                    HealthStatus::Degraded,
                    format!("health check timed out after {}ms", deadline.as_millis()),
                );
                report.timed_out = true;
                report
            }
        };

        let elapsed = started.elapsed();
        report.elapsed_ms = elapsed.as_millis() as u64;
        self.manager
            .metrics()
            .probe_completed(elapsed, report.timed_out);
        debug!(
            status = %report.status,
            state = %report.state,
            elapsed_ms = report.elapsed_ms,
            "MQTT health check"
        );
        report
    }

    fn unevaluated(&self, status: HealthStatus, detail: String) -> ProbeReport {
        ProbeReport {
            status,
            detail,
            state: self.manager.current_state(),
            broker_url: None,
            mode: None,
            elapsed_ms: 0,
            timed_out: false,
        }
    }
}

async fn evaluate(manager: &ConnectionManager) -> ProbeReport {
    let state = manager.current_state();
    let report = |status: HealthStatus,
                  detail: String,
                  broker_url: Option<String>,
                  mode: Option<ConfigMode>| ProbeReport {
        status,
        detail,
        state,
        broker_url,
        mode,
        elapsed_ms: 0,
        timed_out: false,
    };

    match state {
        ConnectionState::Disconnected => report(
            HealthStatus::Unhealthy,
            "MQTT client not connected".to_string(),
            None,
            None,
        ),
        ConnectionState::Failed => {
            let snapshot = manager.snapshot().await;
            let detail = match &snapshot.last_error {
                Some(e) => format!("MQTT connection failed: {e}"),
                None => "MQTT connection failed".to_string(),
            };
            report(HealthStatus::Unhealthy, detail, snapshot.broker_url, snapshot.mode)
        }
        ConnectionState::Connecting | ConnectionState::Reconnecting => {
            let snapshot = manager.snapshot().await;
            report(
                HealthStatus::Degraded,
                format!(
                    "MQTT connection attempt in progress ({} of {} failed)",
                    snapshot.failed_attempts, snapshot.max_attempts
                ),
                snapshot.broker_url,
                snapshot.mode,
            )
        }
        ConnectionState::Connected => {
            let Some(session) = manager.current_session().await else {
                return report(
                    HealthStatus::Degraded,
                    "MQTT connected but no live session".to_string(),
                    None,
                    None,
                );
            };
            let broker_url = Some(session.endpoint().redacted_url());
            let mode = Some(session.mode());
            let expected = manager.resolved_endpoint().await;
            if session.endpoint() == &expected {
                report(
                    HealthStatus::Healthy,
                    format!("MQTT connected to {}", session.endpoint()),
                    broker_url,
                    mode,
                )
            } else {
                report(
                    HealthStatus::Degraded,
                    format!(
                        "MQTT connected to {} but configuration points to {}",
                        session.endpoint(),
                        expected
                    ),
                    broker_url,
                    mode,
                )
            }
        }
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub component: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub response_time_ms: Option<u64>,
}

impl HealthCheckResult {
    pub fn healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Trait for components that can be health checked
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> HealthCheckResult;

    fn component_name(&self) -> &str;
}

/// Connection manager health check backed by [`HealthProbe`]
pub struct MqttHealthCheck {
    probe: HealthProbe,
}

impl MqttHealthCheck {
    pub fn new(probe: HealthProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl HealthCheck for MqttHealthCheck {
    async fn health_check(&self) -> HealthCheckResult {
        let report = self.probe.check().await;
        HealthCheckResult {
            component: self.component_name().to_string(),
            status: report.status,
            message: Some(report.detail),
            response_time_ms: Some(report.elapsed_ms),
        }
    }

    fn component_name(&self) -> &str {
        "mqtt"
    }
}

/// Status delivery health: degraded once reports start failing or dropping
pub struct StatusDeliveryHealthCheck {
    metrics: Arc<MetricsCollector>,
}

impl StatusDeliveryHealthCheck {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl HealthCheck for StatusDeliveryHealthCheck {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let status = self.metrics.get_metrics().status;
        let lost = status.failed + status.dropped;

        let (health, message) = if lost == 0 {
            (HealthStatus::Healthy, "status reports delivered".to_string())
        } else {
            (
                HealthStatus::Degraded,
                format!(
                    "{} of {} status reports not delivered",
                    lost,
                    status.queued + status.dropped
                ),
            )
        };

        HealthCheckResult {
            component: self.component_name().to_string(),
            status: health,
            message: Some(message),
            response_time_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    fn component_name(&self) -> &str {
        "status_reporting"
    }
}

/// Aggregated health check manager
#[derive(Default)]
pub struct HealthCheckManager {
    health_checks: Vec<Box<dyn HealthCheck>>,
}

impl HealthCheckManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_health_check(&mut self, health_check: Box<dyn HealthCheck>) {
        self.health_checks.push(health_check);
    }

    pub async fn run_health_checks(&self) -> Vec<HealthCheckResult> {
        let mut results = Vec::with_capacity(self.health_checks.len());
        for health_check in &self.health_checks {
            results.push(health_check.health_check().await);
        }
        results
    }

    /// Worst status across all components
    pub fn overall(results: &[HealthCheckResult]) -> HealthStatus {
        if results.is_empty() {
            warn!("No health checks configured - assuming healthy");
        }
        results
            .iter()
            .fold(HealthStatus::Healthy, |acc, r| acc.combine(r.status))
    }
}
