//! Status sink implementations

use super::{StatusError, StatusReport, StatusSink};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// POSTs reports as JSON to the dashboard
pub struct HttpStatusSink {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpStatusSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StatusSink for HttpStatusSink {
    async fn deliver(&self, report: &StatusReport) -> Result<(), StatusError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(report)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StatusError::Timeout(self.timeout)
                } else {
                    StatusError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(StatusError::Rejected(status.as_u16()))
        }
    }
}

/// Writes reports to the log only; used when no endpoint is configured
#[derive(Debug, Default)]
pub struct LogStatusSink;

#[async_trait]
impl StatusSink for LogStatusSink {
    async fn deliver(&self, report: &StatusReport) -> Result<(), StatusError> {
        info!(
            connection_state = %report.connection_state,
            is_connected = report.is_connected,
            broker_url = report.broker_url.as_deref().unwrap_or("-"),
            mode = report.mode.map(|m| m.as_str()).unwrap_or("-"),
            client_id = report.client_id.as_deref().unwrap_or("-"),
            attempt = report.attempt,
            "MQTT status"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mqtt::ConnectionState;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn report() -> StatusReport {
        StatusReport {
            is_connected: true,
            connection_state: ConnectionState::Connected,
            broker_url: Some("mqtt://broker:1883".to_string()),
            mode: None,
            client_id: Some("gw-1".to_string()),
            attempt: 1,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_http_sink_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/mqtt/status"))
            .and(body_partial_json(serde_json::json!({
                "is_connected": true,
                "connection_state": "connected"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpStatusSink::new(
            format!("{}/api/mqtt/status", server.uri()),
            Duration::from_secs(2),
        );
        sink.deliver(&report()).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_sink_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sink = HttpStatusSink::new(server.uri(), Duration::from_secs(2));
        let err = sink.deliver(&report()).await.unwrap_err();
        assert!(matches!(err, StatusError::Rejected(503)));
    }

    #[tokio::test]
    async fn test_log_sink_always_succeeds() {
        assert!(LogStatusSink.deliver(&report()).await.is_ok());
    }
}
