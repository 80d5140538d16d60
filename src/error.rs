//! Crate-level error type
//!
//! Each layer owns its error enum; [`GatewayError`] wraps them for callers
//! that cross layers (CLI, runtime, HTTP surface).

use crate::broker::endpoint::EndpointError;
use crate::broker::provider::ProviderError;
use crate::config::ConfigError;
use crate::manager::SessionError;
use crate::status::StatusError;
use crate::transport::mqtt::MqttError;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Main error type for gateway MQTT operations
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Broker endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Status reporting error: {0}")]
    Status(#[from] StatusError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl GatewayError {
    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Error text safe to expose in health details and status reports
    pub fn sanitized(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

fn secret_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)(password|passwd|token|key|secret)[=:]\s*\S+").ok())
        .as_ref()
}

fn userinfo_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"([a-zA-Z][a-zA-Z0-9+.-]*://)([^:/@\s]+):([^@/\s]+)@").ok())
        .as_ref()
}

/// Redact secrets and URL passwords, and cap the length at 500 characters
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(re) = secret_pattern() {
        sanitized = re.replace_all(&sanitized, "${1}=***").into_owned();
    }

    if let Some(re) = userinfo_pattern() {
        sanitized = re.replace_all(&sanitized, "${1}${2}:***@").into_owned();
    }

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}
