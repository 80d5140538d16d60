//! Broker selection
//!
//! - [`endpoint`] - URL parsing into validated endpoints
//! - [`mode`] - env-derived vs persisted-derived mode selection
//! - [`provider`] - persisted configuration sources
//! - [`resolver`] - mode to endpoint resolution with fallback

pub mod endpoint;
pub mod mode;
pub mod provider;
pub mod resolver;

pub use endpoint::{BrokerEndpoint, Credentials, EndpointError, Scheme};
pub use mode::{ConfigMode, FileModeSelector, InMemoryModeSelector, ModeSelector};
pub use provider::{
    ConfigProvider, FileConfigProvider, HttpConfigProvider, PersistedBrokerConfig, ProviderError,
};
pub use resolver::{BrokerConfigResolver, EndpointSource, ResolvedEndpoint};
