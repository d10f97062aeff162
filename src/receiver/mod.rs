//! OTLP/gRPC trace receiver.
//!
//! Accepts `ExportTraceServiceRequest`s on the standard OTLP trace service
//! and hands each batch to the [`TracesProcessor`]. The processor never
//! rejects data, so every export succeeds.

use crate::core::{ProcessorError, Result};
use crate::processor::TracesProcessor;
use opentelemetry_proto::tonic::collector::trace::v1::{
    trace_service_server::{TraceService, TraceServiceServer},
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tonic::{transport::Server, Request, Response, Status};

/// GRPC trace service feeding the processor
pub struct OtlpReceiver {
    processor: Arc<TracesProcessor>,
}

impl OtlpReceiver {
    pub fn new(processor: Arc<TracesProcessor>) -> Self {
        Self { processor }
    }

    /// Serve on `port` until the stop signal fires
    pub async fn serve(self, port: u16, mut stop: watch::Receiver<bool>) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tracing::info!("OTLP/gRPC receiver listening on {}", addr);

        Server::builder()
            .add_service(TraceServiceServer::new(self))
            .serve_with_shutdown(addr, async move {
                let _ = stop.changed().await;
            })
            .await
            .map_err(|e| ProcessorError::network(format!("GRPC receiver on {} failed: {}", addr, e)))?;

        tracing::info!("OTLP/gRPC receiver stopped");
        Ok(())
    }
}

#[tonic::async_trait]
impl TraceService for OtlpReceiver {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> std::result::Result<Response<ExportTraceServiceResponse>, Status> {
        let batch = request.into_inner();
        tracing::debug!("Received export with {} resource spans", batch.resource_spans.len());
        self.processor.consume_traces(batch);
        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}
