//! Inline OpenTelemetry trace processor.
//!
//! Sits between an OTLP source and a downstream collector and, for every
//! batch of spans:
//!
//! - **Enriches** spans with `asserts.request.type`, `asserts.error.type`
//!   and a canonical `asserts.request.context`
//! - **Records RED metrics**: a span latency histogram and trace/span
//!   counters, with request-context cardinality bounded per service
//! - **Samples** traces: per (service, request), the slowest traces above a
//!   latency threshold, erroring traces, and a periodic trickle of the rest
//!   are forwarded downstream on every flush
//!
//! Thresholds and configuration are refreshed from a control plane in the
//! background and applied through [`control::ConfigListener`]s.
//!
//! # Architecture
//!
//! - `core`: configuration, errors, entity keys and OTLP helpers
//! - `enrich`: request-context derivation and span enrichment
//! - `metrics`: Prometheus vectors, cardinality caches, `/metrics` endpoint
//! - `trace`: reassembly of batches into per-service trace segments
//! - `sampling`: bounded queues, threshold lookup, sampler and flush loop
//! - `control`: control-plane client and configuration refresh
//! - `processor`: the processing pipeline and its background tasks
//! - `receiver` / `exporter`: OTLP/gRPC in and out
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use asserts_processor::core::Config;
//! use asserts_processor::exporter::LoggingExporter;
//! use asserts_processor::processor::TracesProcessor;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let processor = TracesProcessor::new(Config::default(), Arc::new(LoggingExporter))?;
//!     processor.start().await?;
//!     processor.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod control;
pub mod core;
pub mod enrich;
pub mod exporter;
pub mod metrics;
pub mod processor;
pub mod receiver;
pub mod sampling;
pub mod trace;

// Re-export core types for convenience
pub use crate::core::{Config, ProcessorError, Result};
pub use crate::processor::{TraceConsumer, TracesProcessor};
