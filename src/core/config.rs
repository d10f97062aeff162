//! Configuration management for the processor.
//!
//! This module provides configuration handling with:
//! - YAML file support (local startup configuration)
//! - JSON support (configuration served by the control plane)
//! - CLI argument overrides through [`ConfigBuilder`]
//! - Validation and defaults

use crate::core::{ProcessorError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Complete processor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Control-plane connection; remote refresh is disabled when absent
    pub asserts_server: Option<AssertsServer>,
    /// Environment label attached to every metric and entity key
    pub asserts_env: String,
    /// Deployment site label attached to every metric and entity key
    pub asserts_site: String,
    /// Request-context rules keyed by `namespace#service`, `service` or `default`
    pub request_context_regex: HashMap<String, Vec<MatcherDto>>,
    /// Error-type rules keyed by the span attribute they inspect
    pub error_type_configs: HashMap<String, Vec<ErrorTypeConfig>>,
    /// Span or resource attributes copied onto the latency histogram
    pub attributes_as_metric_labels: Vec<String>,
    /// Latency above which a root span is slow when no remote threshold exists
    pub sampling_latency_threshold_seconds: f64,
    /// Distinct request contexts tracked per service
    pub limit_per_service: usize,
    /// Distinct request contexts per span kind, and the per-request queue bound
    pub limit_per_request_per_service: usize,
    /// How often sampled traces are forwarded downstream
    pub trace_flush_interval_seconds: u64,
    /// How often one otherwise-uninteresting trace of a request is kept
    pub periodic_sampling_interval_seconds: u64,
    /// Port serving `/metrics`; 0 disables the endpoint
    pub prometheus_exporter_port: u16,
    /// How often the configuration is fetched from the control plane
    pub config_refresh_interval_seconds: u64,
    /// How often latency thresholds are fetched from the control plane
    pub threshold_sync_interval_seconds: u64,
    /// OTLP receiver settings
    pub receiver: ReceiverConfig,
    /// Downstream exporter settings
    pub exporter: ExporterConfig,
}

/// Control-plane endpoint and credentials
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertsServer {
    /// Base URL, e.g. `https://control.example.com`
    pub endpoint: String,
    /// Basic auth user
    #[serde(default)]
    pub user: Option<String>,
    /// Basic auth password
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl fmt::Debug for AssertsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertsServer")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A request-context rule as it appears in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherDto {
    /// Span attribute the regex is applied to
    pub attr_name: String,
    /// Span kind the rule applies to (`Server`, `Client`, ...)
    pub span_kind: String,
    /// Regular expression with at least one capture group
    pub regexp: String,
    /// Replacement template; `$1` when empty
    #[serde(default)]
    pub replacement: String,
}

/// An error-type rule as it appears in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTypeConfig {
    /// Regex matched against the attribute value
    pub value_match_regex: String,
    /// Value written to `asserts.error.type` on match
    pub error_type: String,
}

/// OTLP receiver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// GRPC port for the OTLP trace receiver
    pub grpc_port: u16,
}

/// Downstream exporter configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// OTLP/gRPC endpoint receiving sampled traces; sampled traces are only
    /// logged when absent
    pub endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            asserts_server: None,
            asserts_env: "dev".to_string(),
            asserts_site: "us-west-2".to_string(),
            request_context_regex: HashMap::new(),
            error_type_configs: HashMap::new(),
            attributes_as_metric_labels: Vec::new(),
            sampling_latency_threshold_seconds: 3.0,
            limit_per_service: 100,
            limit_per_request_per_service: 5,
            trace_flush_interval_seconds: 30,
            periodic_sampling_interval_seconds: 300,
            prometheus_exporter_port: 9465,
            config_refresh_interval_seconds: 60,
            threshold_sync_interval_seconds: 60,
            receiver: ReceiverConfig::default(),
            exporter: ExporterConfig::default(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig { grpc_port: 4317 }
    }
}

impl Config {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        ConfigBuilder::new().from_yaml(&content)?.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.limit_per_service == 0 {
            return Err(ProcessorError::config("limit_per_service must be greater than 0"));
        }

        if self.limit_per_request_per_service == 0 {
            return Err(ProcessorError::config(
                "limit_per_request_per_service must be greater than 0",
            ));
        }

        if self.limit_per_service < self.limit_per_request_per_service {
            return Err(ProcessorError::config(format!(
                "limit_per_service ({}) must not be less than limit_per_request_per_service ({})",
                self.limit_per_service, self.limit_per_request_per_service
            )));
        }

        if !(self.sampling_latency_threshold_seconds.is_finite()
            && self.sampling_latency_threshold_seconds > 0.0)
        {
            return Err(ProcessorError::config(format!(
                "sampling_latency_threshold_seconds must be a positive number, got {}",
                self.sampling_latency_threshold_seconds
            )));
        }

        for (name, value) in [
            ("trace_flush_interval_seconds", self.trace_flush_interval_seconds),
            ("periodic_sampling_interval_seconds", self.periodic_sampling_interval_seconds),
            ("config_refresh_interval_seconds", self.config_refresh_interval_seconds),
            ("threshold_sync_interval_seconds", self.threshold_sync_interval_seconds),
        ] {
            if value == 0 {
                return Err(ProcessorError::config(format!("{} must be greater than 0", name)));
            }
        }

        if let Some(server) = &self.asserts_server {
            if server.endpoint.trim().is_empty() {
                return Err(ProcessorError::config("asserts_server.endpoint must not be empty"));
            }
        }

        for matchers in self.request_context_regex.values() {
            for matcher in matchers {
                Regex::new(&matcher.regexp)
                    .map_err(|e| ProcessorError::invalid_regex(matcher.regexp.as_str(), e))?;
            }
        }

        for rules in self.error_type_configs.values() {
            for rule in rules {
                Regex::new(&rule.value_match_regex)
                    .map_err(|e| ProcessorError::invalid_regex(rule.value_match_regex.as_str(), e))?;
            }
        }

        Ok(())
    }

    /// Combine a configuration fetched from the control plane with this one.
    ///
    /// The control plane owns the processing rules and limits. Connection
    /// settings and loop intervals stay as configured locally.
    pub fn merge_remote(&self, remote: Config) -> Config {
        Config {
            asserts_server: self.asserts_server.clone(),
            prometheus_exporter_port: self.prometheus_exporter_port,
            config_refresh_interval_seconds: self.config_refresh_interval_seconds,
            threshold_sync_interval_seconds: self.threshold_sync_interval_seconds,
            trace_flush_interval_seconds: self.trace_flush_interval_seconds,
            receiver: self.receiver.clone(),
            exporter: self.exporter.clone(),
            ..remote
        }
    }

    /// Trace flush interval
    pub fn trace_flush_interval(&self) -> Duration {
        Duration::from_secs(self.trace_flush_interval_seconds)
    }

    /// Periodic sampling interval
    pub fn periodic_sampling_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_sampling_interval_seconds)
    }

    /// Config refresh interval
    pub fn config_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.config_refresh_interval_seconds)
    }

    /// Threshold sync interval
    pub fn threshold_sync_interval(&self) -> Duration {
        Duration::from_secs(self.threshold_sync_interval_seconds)
    }
}

/// Configuration builder for programmatic construction
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| ProcessorError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set the control-plane endpoint, keeping any configured credentials
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        match self.config.asserts_server.as_mut() {
            Some(server) => server.endpoint = endpoint,
            None => {
                self.config.asserts_server = Some(AssertsServer {
                    endpoint,
                    user: None,
                    password: None,
                })
            },
        }
        self
    }

    /// Set the environment label
    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.config.asserts_env = env.into();
        self
    }

    /// Set the site label
    pub fn site(mut self, site: impl Into<String>) -> Self {
        self.config.asserts_site = site.into();
        self
    }

    /// Set the default latency threshold
    pub fn latency_threshold(mut self, seconds: f64) -> Self {
        self.config.sampling_latency_threshold_seconds = seconds;
        self
    }

    /// Set both cardinality limits
    pub fn limits(mut self, per_service: usize, per_request_per_service: usize) -> Self {
        self.config.limit_per_service = per_service;
        self.config.limit_per_request_per_service = per_request_per_service;
        self
    }

    /// Set the Prometheus exporter port
    pub fn prometheus_port(mut self, port: u16) -> Self {
        self.config.prometheus_exporter_port = port;
        self
    }

    /// Set the OTLP receiver port
    pub fn grpc_port(mut self, port: u16) -> Self {
        self.config.receiver.grpc_port = port;
        self
    }

    /// Set the downstream OTLP endpoint
    pub fn forward_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.exporter.endpoint = Some(endpoint.into());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
