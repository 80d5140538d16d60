//! Broker endpoint resolution
//!
//! Turns the current [`ConfigMode`] into a validated [`BrokerEndpoint`].
//! Env-derived resolution is checked once at construction; persisted-derived
//! resolution falls back to the env endpoint on any problem and never fails.

use super::endpoint::{BrokerEndpoint, Credentials, EndpointError};
use super::mode::ConfigMode;
use super::provider::{ConfigProvider, PersistedBrokerConfig, ProviderError};
use crate::config::{ConfigError, MqttSection};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where a resolved endpoint came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointSource {
    Env,
    Persisted { config_id: String },
}

impl EndpointSource {
    pub fn config_id(&self) -> Option<&str> {
        match self {
            EndpointSource::Env => None,
            EndpointSource::Persisted { config_id } => Some(config_id),
        }
    }
}

/// Outcome of a resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEndpoint {
    pub endpoint: BrokerEndpoint,
    /// Mode that was requested
    pub mode: ConfigMode,
    pub source: EndpointSource,
    /// Set when persisted resolution fell back to the env endpoint
    pub fallback_reason: Option<String>,
}

/// Pick the configuration the dashboard considers live: the first enabled
/// one, else the first active one.
pub fn select_config(configs: &[PersistedBrokerConfig]) -> Option<&PersistedBrokerConfig> {
    configs
        .iter()
        .find(|c| c.enabled)
        .or_else(|| configs.iter().find(|c| c.active))
}

/// Build the env-derived endpoint from static configuration
pub fn env_endpoint(section: &MqttSection) -> Result<BrokerEndpoint, ConfigError> {
    let endpoint = BrokerEndpoint::parse(&section.broker_url)
        .map_err(|e| ConfigError::InvalidBrokerUrl(e.to_string()))?;

    let credentials = section
        .get_username()
        .map(|username| Credentials::new(username, section.get_password()));

    Ok(endpoint.with_fallback_credentials(credentials))
}

fn endpoint_from_persisted(config: &PersistedBrokerConfig) -> Result<BrokerEndpoint, EndpointError> {
    let credentials = config
        .username
        .as_ref()
        .filter(|u| !u.is_empty())
        .map(|username| Credentials::new(username.clone(), config.password.clone()));

    Ok(BrokerEndpoint::parse(&config.broker_url)?.with_fallback_credentials(credentials))
}

pub struct BrokerConfigResolver {
    env_endpoint: BrokerEndpoint,
    provider: Option<Arc<dyn ConfigProvider>>,
    lookup_timeout: Duration,
}

impl BrokerConfigResolver {
    pub fn new(
        env_endpoint: BrokerEndpoint,
        provider: Option<Arc<dyn ConfigProvider>>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            env_endpoint,
            provider,
            lookup_timeout,
        }
    }

    /// Build from the `[mqtt]` section. A bad env URL is a startup error.
    pub fn from_section(
        section: &MqttSection,
        provider: Option<Arc<dyn ConfigProvider>>,
        lookup_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(env_endpoint(section)?, provider, lookup_timeout))
    }

    pub fn env_endpoint(&self) -> &BrokerEndpoint {
        &self.env_endpoint
    }

    /// Resolve the endpoint for `mode`
    pub async fn resolve(&self, mode: ConfigMode) -> ResolvedEndpoint {
        match mode {
            ConfigMode::EnvDerived => ResolvedEndpoint {
                endpoint: self.env_endpoint.clone(),
                mode,
                source: EndpointSource::Env,
                fallback_reason: None,
            },
            ConfigMode::PersistedDerived => self.resolve_persisted().await,
        }
    }

    async fn resolve_persisted(&self) -> ResolvedEndpoint {
        let config = match self.active_config().await {
            Ok(Some(config)) => config,
            Ok(None) => return self.fallback("no enabled or active persisted configuration"),
            Err(e) => return self.fallback(&e.to_string()),
        };

        match endpoint_from_persisted(&config) {
            Ok(endpoint) => {
                debug!(
                    config_id = %config.id,
                    endpoint = %endpoint,
                    "Resolved broker endpoint from persisted configuration"
                );
                ResolvedEndpoint {
                    endpoint,
                    mode: ConfigMode::PersistedDerived,
                    source: EndpointSource::Persisted {
                        config_id: config.id,
                    },
                    fallback_reason: None,
                }
            }
            Err(e) => self.fallback(&format!("persisted configuration '{}': {e}", config.id)),
        }
    }

    /// Live lookup of the selected persisted configuration
    pub async fn active_config(&self) -> Result<Option<PersistedBrokerConfig>, ProviderError> {
        let Some(provider) = &self.provider else {
            return Ok(None);
        };

        let configs = tokio::time::timeout(self.lookup_timeout, provider.list_configs())
            .await
            .map_err(|_| ProviderError::Timeout(self.lookup_timeout))??;

        Ok(select_config(&configs).cloned())
    }

    fn fallback(&self, reason: &str) -> ResolvedEndpoint {
        warn!(
            reason = %reason,
            endpoint = %self.env_endpoint,
            "Persisted broker configuration unusable, falling back to environment endpoint"
        );
        ResolvedEndpoint {
            endpoint: self.env_endpoint.clone(),
            mode: ConfigMode::PersistedDerived,
            source: EndpointSource::Env,
            fallback_reason: Some(reason.to_string()),
        }
    }
}
