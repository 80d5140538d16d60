//! Health check HTTP server
//!
//! Exposes the bounded MQTT probe, readiness and liveness, metrics, the
//! connection manager snapshot, and a reconnect trigger over HTTP.

use crate::error::{GatewayError, GatewayResult};
use crate::health::{
    HealthCheckManager, HealthCheckResult, HealthProbe, HealthStatus, MqttHealthCheck,
    StatusDeliveryHealthCheck,
};
use crate::manager::ConnectionManager;
use crate::observability::metrics::MetricsCollector;
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

/// HTTP health check server
pub struct HealthServer {
    service_name: String,
    port: u16,
    manager: Arc<ConnectionManager>,
    metrics: Arc<MetricsCollector>,
    checks: HealthCheckManager,
}

impl HealthServer {
    pub fn new(
        service_name: String,
        port: u16,
        manager: Arc<ConnectionManager>,
        probe: HealthProbe,
    ) -> Self {
        let metrics = manager.metrics().clone();
        let mut checks = HealthCheckManager::new();
        checks.add_health_check(Box::new(MqttHealthCheck::new(probe)));
        checks.add_health_check(Box::new(StatusDeliveryHealthCheck::new(metrics.clone())));

        Self {
            service_name,
            port,
            manager,
            metrics,
            checks,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// All routes, for serving or for `warp::test`
    pub fn routes(
        self: &Arc<Self>,
    ) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
        let server = self.clone();
        let with_server = warp::any().map(move || server.clone());

        // GET /health - aggregate status with the bounded MQTT probe
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_server.clone())
            .and_then(|server: Arc<Self>| async move {
                Ok::<_, Infallible>(server.health_response().await)
            });

        // GET /ready - ready once the broker connection is up
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_server.clone())
            .map(|server: Arc<Self>| {
                let state = server.manager.current_state();
                let ready = state.is_connected();
                let response = ReadinessResponse {
                    ready,
                    state: state.as_str(),
                    timestamp: current_timestamp(),
                };
                let code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                warp::reply::with_status(warp::reply::json(&response), code).into_response()
            });

        // GET /live - the process is serving requests
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
                .into_response()
            });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_server.clone())
            .map(|server: Arc<Self>| warp::reply::json(&server.metrics.get_metrics()).into_response());

        // GET /mqtt/status - connection manager snapshot
        let status_route = warp::path!("mqtt" / "status")
            .and(warp::get())
            .and(with_server.clone())
            .and_then(|server: Arc<Self>| async move {
                let snapshot = server.manager.snapshot().await;
                Ok::<_, Infallible>(warp::reply::json(&snapshot).into_response())
            });

        // POST /mqtt/reconnect - start a fresh connection in the background
        let reconnect_route = warp::path!("mqtt" / "reconnect")
            .and(warp::post())
            .and(with_server.clone())
            .map(|server: Arc<Self>| {
                let manager = server.manager.clone();
                tokio::spawn(async move {
                    if let Err(e) = manager.reconnect().await {
                        warn!(error = %e, "Reconnect requested over HTTP failed");
                    }
                });
                let response = ReconnectResponse {
                    accepted: true,
                    timestamp: current_timestamp(),
                };
                warp::reply::with_status(warp::reply::json(&response), StatusCode::ACCEPTED)
                    .into_response()
            });

        // GET / - endpoint listing
        let root_route = warp::path::end().and(warp::get()).map(|| {
            let endpoints = BTreeMap::from([
                ("/health", "Overall health with the bounded MQTT probe"),
                ("/ready", "Readiness: broker connection established"),
                ("/live", "Liveness probe"),
                ("/metrics", "Connection, status delivery and probe metrics"),
                ("/mqtt/status", "Connection manager snapshot"),
                ("/mqtt/reconnect", "POST: tear down and reconnect"),
            ]);
            warp::reply::json(&ApiDocumentationResponse { endpoints }).into_response()
        });

        health_route
            .or(ready_route)
            .unify()
            .or(live_route)
            .unify()
            .or(metrics_route)
            .unify()
            .or(status_route)
            .unify()
            .or(reconnect_route)
            .unify()
            .or(root_route)
            .unify()
    }

    /// Serve until `shutdown` resolves
    pub async fn start(
        self: Arc<Self>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> GatewayResult<()> {
        let routes = self.routes().with(warp::cors().allow_any_origin());
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));

        let (bound, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, shutdown)
            .map_err(|e| GatewayError::internal_error(format!("health server bind failed: {e}")))?;

        info!(address = %bound, "Health server listening");
        server.await;
        info!("Health server stopped");
        Ok(())
    }

    async fn health_response(&self) -> Response {
        let checks = self.checks.run_health_checks().await;
        let status = HealthCheckManager::overall(&checks);
        let response = HealthResponse {
            status,
            service: self.service_name.clone(),
            timestamp: current_timestamp(),
            uptime_seconds: self.metrics.get_metrics().uptime_seconds,
            checks,
        };
        let code = if status == HealthStatus::Healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        warp::reply::with_status(warp::reply::json(&response), code).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: HealthStatus,
    service: String,
    timestamp: u64,
    uptime_seconds: u64,
    checks: Vec<HealthCheckResult>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    state: &'static str,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ReconnectResponse {
    accepted: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: BTreeMap<&'static str, &'static str>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::endpoint::BrokerEndpoint;
    use crate::broker::mode::{ConfigMode, InMemoryModeSelector};
    use crate::broker::resolver::BrokerConfigResolver;
    use crate::testing::mocks::MockConnector;
    use std::time::Duration;

    fn server(connector: Arc<MockConnector>) -> Arc<HealthServer> {
        let resolver = BrokerConfigResolver::new(
            BrokerEndpoint::parse("mqtt://broker:1883").unwrap(),
            None,
            Duration::from_millis(100),
        );
        let manager = ConnectionManager::builder(
            resolver,
            connector,
            Arc::new(InMemoryModeSelector::new(ConfigMode::EnvDerived)),
        )
        .build();
        let probe = HealthProbe::new(manager.clone(), Duration::from_secs(1));
        Arc::new(HealthServer::new("gateway-test".to_string(), 0, manager, probe))
    }

    #[tokio::test]
    async fn test_live_always_ok() {
        let server = server(Arc::new(MockConnector::new()));
        let response = warp::test::request()
            .method("GET")
            .path("/live")
            .reply(&server.routes())
            .await;
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_health_unavailable_until_connected() {
        let server = server(Arc::new(MockConnector::new()));
        let routes = server.routes();

        let response = warp::test::request().path("/health").reply(&routes).await;
        assert_eq!(response.status(), 503);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "unhealthy");

        server.manager.ensure_connected().await.unwrap();
        let response = warp::test::request().path("/health").reply(&routes).await;
        assert_eq!(response.status(), 200);
        let ready = warp::test::request().path("/ready").reply(&routes).await;
        assert_eq!(ready.status(), 200);
    }

    #[tokio::test]
    async fn test_mqtt_status_snapshot() {
        let server = server(Arc::new(MockConnector::new()));
        server.manager.ensure_connected().await.unwrap();

        let response = warp::test::request()
            .path("/mqtt/status")
            .reply(&server.routes())
            .await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["state"], "connected");
        assert_eq!(body["broker_url"], "mqtt://broker:1883");
    }

    #[tokio::test]
    async fn test_reconnect_is_accepted() {
        let connector = Arc::new(MockConnector::new());
        let server = server(connector.clone());
        server.manager.ensure_connected().await.unwrap();

        let response = warp::test::request()
            .method("POST")
            .path("/mqtt/reconnect")
            .reply(&server.routes())
            .await;
        assert_eq!(response.status(), 202);

        tokio::time::timeout(Duration::from_secs(1), async {
            while connector.attempts() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_root_lists_endpoints() {
        let server = server(Arc::new(MockConnector::new()));
        let response = warp::test::request().path("/").reply(&server.routes()).await;
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert!(body["endpoints"]["/mqtt/status"].is_string());
    }
}
