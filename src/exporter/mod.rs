//! Downstream consumers for sampled traces.

use crate::core::{ProcessorError, Result};
use crate::processor::TraceConsumer;
use crate::trace::TraceBatch;
use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use prost::Message;
use tonic::transport::Channel;
use tonic::Request;

/// Forwards sampled traces to an OTLP/gRPC endpoint
#[derive(Debug, Clone)]
pub struct GrpcExporter {
    client: TraceServiceClient<Channel>,
    endpoint: String,
}

impl GrpcExporter {
    /// The connection is established on first export
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        let channel = Channel::from_shared(endpoint.clone())
            .map_err(|e| ProcessorError::config(format!("Invalid exporter endpoint {}: {}", endpoint, e)))?
            .connect_lazy();
        Ok(Self {
            client: TraceServiceClient::new(channel),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TraceConsumer for GrpcExporter {
    async fn consume_traces(&self, batch: TraceBatch) -> Result<()> {
        let mut client = self.client.clone();
        let response = client.export(Request::new(batch)).await.map_err(|status| {
            ProcessorError::consumer(format!(
                "{} export failed: {:?} {}",
                self.endpoint,
                status.code(),
                status.message()
            ))
        })?;
        if let Some(partial) = response.into_inner().partial_success {
            if partial.rejected_spans > 0 {
                tracing::warn!(
                    "{} rejected {} spans: {}",
                    self.endpoint,
                    partial.rejected_spans,
                    partial.error_message
                );
            }
        }
        Ok(())
    }
}

/// Logs sampled traces instead of forwarding them
#[derive(Debug, Default)]
pub struct LoggingExporter;

#[async_trait]
impl TraceConsumer for LoggingExporter {
    async fn consume_traces(&self, batch: TraceBatch) -> Result<()> {
        let spans: usize = batch
            .resource_spans
            .iter()
            .flat_map(|rs| rs.scope_spans.iter())
            .map(|ss| ss.spans.len())
            .sum();
        let trace_id = batch
            .resource_spans
            .first()
            .and_then(|rs| rs.scope_spans.first())
            .and_then(|ss| ss.spans.first())
            .map(|s| hex::encode(&s.trace_id))
            .unwrap_or_default();
        tracing::info!(
            "Sampled trace {} ({} segments, {} spans, {} bytes)",
            trace_id,
            batch.resource_spans.len(),
            spans,
            batch.encoded_len()
        );
        Ok(())
    }
}
