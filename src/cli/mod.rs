//! Command-line interface.
//!
//! Run `asserts-processor --endpoint https://control-plane` to receive OTLP
//! traces on port 4317, serve metrics on port 9465 and refresh thresholds
//! and configuration from the control plane.

use crate::core::{Config, ConfigBuilder, ProcessorError, Result};
use crate::exporter::{GrpcExporter, LoggingExporter};
use crate::processor::{TraceConsumer, TracesProcessor};
use crate::receiver::OtlpReceiver;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Inline OTEL trace processor: enrichment, RED metrics and latency sampling
#[derive(Parser, Debug)]
#[command(name = "asserts-processor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (YAML)
    #[arg(short, long, env = "ASSERTS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Control-plane endpoint serving configuration and thresholds
    #[arg(long, env = "ASSERTS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Environment label
    #[arg(long, env = "ASSERTS_ENV")]
    pub env: Option<String>,

    /// Deployment site label
    #[arg(long, env = "ASSERTS_SITE")]
    pub site: Option<String>,

    /// Port for the Prometheus scrape endpoint (0 disables it)
    #[arg(long, env = "ASSERTS_PROMETHEUS_PORT")]
    pub prometheus_port: Option<u16>,

    /// GRPC port for the OTLP trace receiver
    #[arg(long, env = "ASSERTS_GRPC_PORT")]
    pub grpc_port: Option<u16>,

    /// OTLP/gRPC endpoint receiving sampled traces
    #[arg(long, env = "ASSERTS_FORWARD_ENDPOINT")]
    pub forward_endpoint: Option<String>,

    /// Enable debug logging
    #[arg(short, long, env = "ASSERTS_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments and environment variables
    /// 2. Config file
    /// 3. Defaults
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        if let Some(path) = &self.config {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                ProcessorError::config(format!("Failed to read config file {:?}: {}", path, e))
            })?;
            builder = builder.from_yaml(&content)?;
            tracing::info!("Loaded configuration from: {:?}", path);
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint(endpoint.as_str());
        }
        if let Some(env) = &self.env {
            builder = builder.env(env.as_str());
        }
        if let Some(site) = &self.site {
            builder = builder.site(site.as_str());
        }
        if let Some(port) = self.prometheus_port {
            builder = builder.prometheus_port(port);
        }
        if let Some(port) = self.grpc_port {
            builder = builder.grpc_port(port);
        }
        if let Some(endpoint) = &self.forward_endpoint {
            builder = builder.forward_endpoint(endpoint.as_str());
        }
        builder.build()
    }

    /// Initialize logging based on configuration.
    pub fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_log_level = std::env::var("ASSERTS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_level = if self.debug {
            "debug"
        } else {
            env_log_level.as_str()
        };

        let filter = if self.debug {
            EnvFilter::new(log_level)
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(self.debug)
            .compact();

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| ProcessorError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

fn consumer(config: &Config) -> Result<Arc<dyn TraceConsumer>> {
    match &config.exporter.endpoint {
        Some(endpoint) => {
            tracing::info!("Forwarding sampled traces to {}", endpoint);
            Ok(Arc::new(GrpcExporter::new(endpoint.as_str())?))
        },
        None => {
            tracing::info!("No forward endpoint configured, sampled traces are logged");
            Ok(Arc::new(LoggingExporter))
        },
    }
}

/// Run the processor until Ctrl+C.
pub async fn execute(cli: Cli) -> Result<()> {
    cli.init_logging()?;

    let config = cli.load_config().await?;

    if cli.check_config {
        println!("Configuration is valid!");
        match &config.asserts_server {
            Some(server) => println!("  Control plane: {}", server.endpoint),
            None => println!("  Control plane: none"),
        }
        println!("  Environment: {}/{}", config.asserts_env, config.asserts_site);
        println!("  GRPC port: {}", config.receiver.grpc_port);
        println!("  Prometheus port: {}", config.prometheus_exporter_port);
        println!("  Latency threshold: {}s", config.sampling_latency_threshold_seconds);
        return Ok(());
    }

    let grpc_port = config.receiver.grpc_port;
    let processor = Arc::new(TracesProcessor::new(config.clone(), consumer(&config)?)?);
    processor.start().await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut receiver = tokio::spawn(OtlpReceiver::new(Arc::clone(&processor)).serve(grpc_port, stop_rx));

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            stop_tx.send_replace(true);
            receiver.await?
        }
        joined = &mut receiver => {
            tracing::warn!("GRPC receiver stopped unexpectedly");
            joined?
        }
    };

    processor.shutdown().await;
    result
}
