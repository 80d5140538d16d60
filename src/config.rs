//! Gateway configuration
//!
//! Loaded from a TOML file. Every section has defaults so a minimal file
//! (or none at all) is valid. Credentials are never stored in the file,
//! only the names of the environment variables holding them.

use crate::broker::endpoint::BrokerEndpoint;
use crate::broker::mode::ConfigMode;
use crate::transport::mqtt::reconnect::ReconnectConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Env var overriding `[mqtt] broker_url`
pub const BROKER_URL_ENV: &str = "MQTT_BROKER_URL";

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub persisted: PersistedSection,
    #[serde(default)]
    pub mode: ModeSection,
    #[serde(default)]
    pub status: StatusSection,
    #[serde(default)]
    pub health: HealthSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    #[serde(default = "default_service_name")]
    pub name: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "iot-gateway".to_string()
}

/// MQTT client section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Env-derived broker URL
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Environment variable containing username
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable containing password
    #[serde(default)]
    pub password_env: Option<String>,
    /// Client ids are `{prefix}-{random}`, unique per attempt
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    /// Time allowed for the broker's CONNACK
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// Time allowed for closing a session before it is abandoned
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,
    #[serde(default)]
    pub last_will: Option<LastWillSection>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            username_env: None,
            password_env: None,
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            clean_session: true,
            connect_timeout_ms: default_connect_timeout_ms(),
            max_packet_size: default_max_packet_size(),
            teardown_timeout_ms: default_teardown_timeout_ms(),
            last_will: None,
        }
    }
}

impl MqttSection {
    /// Get MQTT username from environment variable
    pub fn get_username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_deref()).filter(|u| !u.is_empty())
    }

    /// Get MQTT password from environment variable
    pub fn get_password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_deref())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

/// Message the broker publishes if the gateway drops off
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastWillSection {
    pub topic: String,
    pub payload: String,
    #[serde(default = "default_last_will_qos")]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_client_id_prefix() -> String {
    "iot-gateway".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_max_packet_size() -> usize {
    256 * 1024
}

fn default_teardown_timeout_ms() -> u64 {
    2000
}

fn default_last_will_qos() -> u8 {
    1
}

/// Transport negotiation section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportSection {
    /// Downgrade ws/wss URLs to the raw-socket equivalent
    #[serde(default = "default_true")]
    pub prefer_raw_socket: bool,
    #[serde(default = "default_tcp_port")]
    pub default_tcp_port: u16,
    #[serde(default = "default_tls_port")]
    pub default_tls_port: u16,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            prefer_raw_socket: true,
            default_tcp_port: default_tcp_port(),
            default_tls_port: default_tls_port(),
        }
    }
}

fn default_tcp_port() -> u16 {
    1883
}

fn default_tls_port() -> u16 {
    8883
}

/// Kind of persisted configuration store
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PersistedSourceKind {
    #[default]
    None,
    File,
    Http,
}

/// Persisted broker configuration store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedSection {
    #[serde(default)]
    pub source: PersistedSourceKind,
    /// JSON file, when `source = "file"`
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Configuration API, when `source = "http"`
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

impl Default for PersistedSection {
    fn default() -> Self {
        Self {
            source: PersistedSourceKind::None,
            path: None,
            url: None,
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

impl PersistedSection {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

fn default_lookup_timeout_ms() -> u64 {
    500
}

/// Configuration mode selection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModeSection {
    /// Mode used when no mode file exists
    #[serde(default)]
    pub default: ConfigMode,
    /// File written by the dashboard when the operator toggles the mode
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Status sink section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSection {
    /// Dashboard endpoint receiving status POSTs; log-only when absent
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_status_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_status_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_status_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_status_queue_capacity")]
    pub queue_capacity: usize,
    /// Deliver only the newest queued report
    #[serde(default = "default_true")]
    pub coalesce: bool,
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: default_status_timeout_ms(),
            max_retries: default_status_max_retries(),
            retry_delay_ms: default_status_retry_delay_ms(),
            queue_capacity: default_status_queue_capacity(),
            coalesce: true,
        }
    }
}

impl StatusSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_status_timeout_ms() -> u64 {
    2000
}

fn default_status_max_retries() -> u32 {
    2
}

fn default_status_retry_delay_ms() -> u64 {
    250
}

fn default_status_queue_capacity() -> usize {
    64
}

/// Health endpoint section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_health_port")]
    pub port: u16,
    /// Deadline for the MQTT sub-check of `/health`
    #[serde(default = "default_mqtt_deadline_ms")]
    pub mqtt_deadline_ms: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_health_port(),
            mqtt_deadline_ms: default_mqtt_deadline_ms(),
        }
    }
}

impl HealthSection {
    pub fn mqtt_deadline(&self) -> Duration {
        Duration::from_millis(self.mqtt_deadline_ms)
    }
}

fn default_health_port() -> u16 {
    8081
}

fn default_mqtt_deadline_ms() -> u64 {
    1000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GatewayConfig {
    /// Load configuration from TOML file, apply env overrides and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse, apply env overrides and validate
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: GatewayConfig = toml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus env overrides, used when no file is given
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = GatewayConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = get_env_var_optional(Some(BROKER_URL_ENV)).filter(|u| !u.trim().is_empty())
        {
            self.mqtt.broker_url = url;
        }
    }

    /// Check cross-field consistency. A bad env broker URL is fatal here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        BrokerEndpoint::parse(&self.mqtt.broker_url)
            .map_err(|e| ConfigError::InvalidBrokerUrl(e.to_string()))?;

        if self.mqtt.client_id_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_id_prefix must not be empty".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(will) = &self.mqtt.last_will {
            if will.qos > 2 {
                return Err(ConfigError::InvalidConfig(format!(
                    "mqtt.last_will.qos must be 0, 1 or 2 (got {})",
                    will.qos
                )));
            }
            if will.topic.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "mqtt.last_will.topic must not be empty".to_string(),
                ));
            }
        }

        self.reconnect
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(format!("reconnect: {e}")))?;

        match self.persisted.source {
            PersistedSourceKind::File if self.persisted.path.is_none() => {
                return Err(ConfigError::InvalidConfig(
                    "persisted.source = \"file\" requires persisted.path".to_string(),
                ));
            }
            PersistedSourceKind::Http if self.persisted.url.is_none() => {
                return Err(ConfigError::InvalidConfig(
                    "persisted.source = \"http\" requires persisted.url".to_string(),
                ));
            }
            _ => {}
        }

        if self.health.mqtt_deadline_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "health.mqtt_deadline_ms must be greater than 0".to_string(),
            ));
        }
        if self.status.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "status.queue_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Helper to get environment variable with consistent error handling
fn get_env_var_optional(env_var_name: Option<&str>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}
