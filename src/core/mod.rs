//! Core domain types, configuration and errors.

pub mod config;
pub mod error;
pub mod otel;
pub mod types;

// Re-export commonly used types
pub use config::{AssertsServer, Config, ConfigBuilder, ErrorTypeConfig, MatcherDto};
pub use error::{ProcessorError, Result};
pub use types::{service_key, EntityKey, RequestKey, ThresholdEntry};
