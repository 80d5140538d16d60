//! Configuration mode selection
//!
//! The dashboard persists whether the gateway should follow the environment
//! broker URL or the stored configurations. The manager only ever reads it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::warn;

/// Where the broker endpoint is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigMode {
    #[default]
    #[serde(alias = "env", alias = "environment")]
    EnvDerived,
    #[serde(alias = "persisted", alias = "database")]
    PersistedDerived,
}

impl ConfigMode {
    /// Parse the loose spellings written by the dashboard
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "env" | "environment" | "env_derived" => Some(ConfigMode::EnvDerived),
            "persisted" | "database" | "db" | "persisted_derived" => {
                Some(ConfigMode::PersistedDerived)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigMode::EnvDerived => "env_derived",
            ConfigMode::PersistedDerived => "persisted_derived",
        }
    }
}

impl fmt::Display for ConfigMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of the current configuration mode, consulted on every resolution
#[async_trait]
pub trait ModeSelector: Send + Sync {
    async fn current_mode(&self) -> ConfigMode;
}

/// Settable in-process mode selector
#[derive(Debug, Default)]
pub struct InMemoryModeSelector {
    mode: RwLock<ConfigMode>,
}

impl InMemoryModeSelector {
    pub fn new(mode: ConfigMode) -> Self {
        Self {
            mode: RwLock::new(mode),
        }
    }

    pub async fn set(&self, mode: ConfigMode) {
        *self.mode.write().await = mode;
    }
}

#[async_trait]
impl ModeSelector for InMemoryModeSelector {
    async fn current_mode(&self) -> ConfigMode {
        *self.mode.read().await
    }
}

#[derive(Deserialize)]
struct ModeFile {
    mode: String,
}

/// Reads the mode from a file holding either `{"mode": "..."}` or a bare word.
/// Missing or unreadable files yield the configured default.
pub struct FileModeSelector {
    path: PathBuf,
    default: ConfigMode,
}

impl FileModeSelector {
    pub fn new(path: impl AsRef<Path>, default: ConfigMode) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            default,
        }
    }

    fn parse_contents(&self, content: &str) -> Option<ConfigMode> {
        let trimmed = content.trim();
        if trimmed.starts_with('{') {
            let parsed: ModeFile = serde_json::from_str(trimmed).ok()?;
            ConfigMode::parse(&parsed.mode)
        } else {
            ConfigMode::parse(trimmed)
        }
    }
}

#[async_trait]
impl ModeSelector for FileModeSelector {
    async fn current_mode(&self) -> ConfigMode {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => self.parse_contents(&content).unwrap_or_else(|| {
                warn!(path = %self.path.display(), "Unrecognised mode file contents, using default");
                self.default
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.default,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read mode file, using default");
                self.default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode_spellings() {
        assert_eq!(ConfigMode::parse("env"), Some(ConfigMode::EnvDerived));
        assert_eq!(
            ConfigMode::parse(" Persisted "),
            Some(ConfigMode::PersistedDerived)
        );
        assert_eq!(ConfigMode::parse("database"), Some(ConfigMode::PersistedDerived));
        assert_eq!(ConfigMode::parse("cloud"), None);
    }

    #[test]
    fn test_mode_serde_aliases() {
        let mode: ConfigMode = serde_json::from_str("\"persisted\"").unwrap();
        assert_eq!(mode, ConfigMode::PersistedDerived);
        assert_eq!(
            serde_json::to_string(&ConfigMode::EnvDerived).unwrap(),
            "\"env_derived\""
        );
    }

    #[tokio::test]
    async fn test_in_memory_selector_set() {
        let selector = InMemoryModeSelector::new(ConfigMode::EnvDerived);
        assert_eq!(selector.current_mode().await, ConfigMode::EnvDerived);
        selector.set(ConfigMode::PersistedDerived).await;
        assert_eq!(selector.current_mode().await, ConfigMode::PersistedDerived);
    }

    #[tokio::test]
    async fn test_file_selector_formats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mode");
        let selector = FileModeSelector::new(&path, ConfigMode::EnvDerived);

        assert_eq!(selector.current_mode().await, ConfigMode::EnvDerived);

        std::fs::write(&path, "persisted\n").unwrap();
        assert_eq!(selector.current_mode().await, ConfigMode::PersistedDerived);

        std::fs::write(&path, r#"{"mode": "env"}"#).unwrap();
        assert_eq!(selector.current_mode().await, ConfigMode::EnvDerived);

        std::fs::write(&path, "nonsense").unwrap();
        assert_eq!(selector.current_mode().await, ConfigMode::EnvDerived);
    }
}
