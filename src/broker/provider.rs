//! Persisted broker configuration providers
//!
//! The dashboard stores broker configurations outside this process. Providers
//! read them on demand; nothing here caches or writes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// A broker configuration as stored by the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedBrokerConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(alias = "url")]
    pub broker_url: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl PersistedBrokerConfig {
    pub fn new(id: impl Into<String>, broker_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            broker_url: broker_url.into(),
            enabled: false,
            active: false,
            username: None,
            password: None,
        }
    }

    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }

    pub fn with_credentials(mut self, username: &str, password: Option<&str>) -> Self {
        self.username = Some(username.to_string());
        self.password = password.map(str::to_string);
        self
    }
}

/// Errors raised while reading persisted configurations
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to read configuration store: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration store: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("configuration service request failed: {0}")]
    Http(String),
    #[error("configuration service returned status {0}")]
    Status(u16),
    #[error("configuration lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Read access to persisted broker configurations
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// List every stored configuration
    async fn list_configs(&self) -> Result<Vec<PersistedBrokerConfig>, ProviderError>;

    /// Short description used in log lines
    fn describe(&self) -> String;
}

/// Accepts either a bare array or `{"configs": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredConfigs {
    List(Vec<PersistedBrokerConfig>),
    Wrapped { configs: Vec<PersistedBrokerConfig> },
}

impl StoredConfigs {
    fn into_vec(self) -> Vec<PersistedBrokerConfig> {
        match self {
            StoredConfigs::List(configs) | StoredConfigs::Wrapped { configs } => configs,
        }
    }
}

/// Provider backed by a JSON file exported by the dashboard
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn list_configs(&self) -> Result<Vec<PersistedBrokerConfig>, ProviderError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Configuration store not found, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let stored: StoredConfigs = serde_json::from_str(&content)?;
        Ok(stored.into_vec())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Provider backed by the dashboard's configuration API
pub struct HttpConfigProvider {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpConfigProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ConfigProvider for HttpConfigProvider {
    async fn list_configs(&self) -> Result<Vec<PersistedBrokerConfig>, ProviderError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        let stored: StoredConfigs = serde_json::from_slice(&body)?;
        Ok(stored.into_vec())
    }

    fn describe(&self) -> String {
        format!("http:{}", self.url)
    }
}
