//! Observability for the gateway's MQTT connection
//!
//! Structured logging, in-memory metrics, and the HTTP health surface.

pub mod health;
pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use health::HealthServer;
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};
