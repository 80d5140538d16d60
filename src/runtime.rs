//! Composition root
//!
//! Wires configuration into the resolver, negotiator, reconnect policy,
//! status reporter, connection manager and health probe. Must be built
//! inside a tokio runtime because the status delivery task is spawned here.

use crate::broker::mode::{FileModeSelector, InMemoryModeSelector, ModeSelector};
use crate::broker::provider::{ConfigProvider, FileConfigProvider, HttpConfigProvider};
use crate::broker::resolver::BrokerConfigResolver;
use crate::config::{GatewayConfig, ModeSection, PersistedSection, PersistedSourceKind};
use crate::error::GatewayResult;
use crate::health::HealthProbe;
use crate::manager::ConnectionManager;
use crate::observability::health::HealthServer;
use crate::observability::metrics::MetricsCollector;
use crate::status::reporter::DeliveryOptions;
use crate::status::{HttpStatusSink, LogStatusSink, StatusReporter, StatusSink};
use crate::transport::mqtt::{ReconnectPolicy, RumqttcConnector};
use crate::transport::{BrokerConnector, ConnectSettings, TransportNegotiator};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Time allowed for queued status reports to drain on shutdown
const STATUS_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct GatewayRuntime {
    config: GatewayConfig,
    manager: Arc<ConnectionManager>,
    probe: HealthProbe,
    metrics: Arc<MetricsCollector>,
    reporter_task: JoinHandle<()>,
}

impl GatewayRuntime {
    /// Build with the `rumqttc` connector
    pub fn build(config: GatewayConfig) -> GatewayResult<Self> {
        Self::build_with_connector(config, Arc::new(RumqttcConnector::default()))
    }

    pub fn build_with_connector(
        config: GatewayConfig,
        connector: Arc<dyn BrokerConnector>,
    ) -> GatewayResult<Self> {
        config.validate()?;

        let metrics = Arc::new(MetricsCollector::new());
        let resolver = BrokerConfigResolver::from_section(
            &config.mqtt,
            persisted_provider(&config.persisted),
            config.persisted.lookup_timeout(),
        )?;

        let sink: Arc<dyn StatusSink> = match &config.status.endpoint {
            Some(url) => {
                info!(endpoint = %url, "Status reports will be posted to dashboard");
                Arc::new(HttpStatusSink::new(url.clone(), config.status.timeout()))
            }
            None => {
                debug!("No status endpoint configured, status reports go to the log");
                Arc::new(LogStatusSink)
            }
        };
        let (reporter, reporter_task) = StatusReporter::spawn(
            sink,
            DeliveryOptions::from_section(&config.status),
            metrics.clone(),
        );

        let manager = ConnectionManager::builder(resolver, connector, mode_selector(&config.mode))
            .negotiator(TransportNegotiator::from_section(&config.transport))
            .policy(ReconnectPolicy::new(config.reconnect.clone()))
            .connect_settings(ConnectSettings::from_section(&config.mqtt))
            .teardown_timeout(config.mqtt.teardown_timeout())
            .reporter(reporter)
            .metrics(metrics.clone())
            .build();

        let probe = HealthProbe::new(manager.clone(), config.health.mqtt_deadline());

        Ok(Self {
            config,
            manager,
            probe,
            metrics,
            reporter_task,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn probe(&self) -> &HealthProbe {
        &self.probe
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// HTTP surface, when `[health]` is enabled
    pub fn health_server(&self) -> Option<Arc<HealthServer>> {
        self.config.health.enabled.then(|| {
            Arc::new(HealthServer::new(
                self.config.service.name.clone(),
                self.config.health.port,
                self.manager.clone(),
                self.probe.clone(),
            ))
        })
    }

    /// Disconnect and give queued status reports a bounded time to drain
    pub async fn shutdown(self) {
        let span = crate::lifecycle_span!(event = "shutdown");
        self.drain().instrument(span).await
    }

    async fn drain(self) {
        self.manager.disconnect().await;

        let Self {
            manager,
            probe,
            mut reporter_task,
            ..
        } = self;
        drop(probe);

        // The delivery task ends once the last reporter handle goes away
        if Arc::strong_count(&manager) > 1 {
            debug!("Connection manager still shared, status drain may be cut short");
        }
        drop(manager);

        if tokio::time::timeout(STATUS_DRAIN_TIMEOUT, &mut reporter_task)
            .await
            .is_err()
        {
            warn!("Status reports still pending at shutdown, abandoning");
            reporter_task.abort();
        }
        info!("Gateway runtime stopped");
    }
}

fn persisted_provider(section: &PersistedSection) -> Option<Arc<dyn ConfigProvider>> {
    let provider: Arc<dyn ConfigProvider> = match section.source {
        PersistedSourceKind::None => return None,
        PersistedSourceKind::File => Arc::new(FileConfigProvider::new(section.path.as_ref()?)),
        PersistedSourceKind::Http => Arc::new(HttpConfigProvider::new(
            section.url.clone()?,
            section.lookup_timeout(),
        )),
    };
    info!(provider = %provider.describe(), "Persisted broker configuration source");
    Some(provider)
}

fn mode_selector(section: &ModeSection) -> Arc<dyn ModeSelector> {
    match &section.path {
        Some(path) => Arc::new(FileModeSelector::new(path, section.default)),
        None => Arc::new(InMemoryModeSelector::new(section.default)),
    }
}
