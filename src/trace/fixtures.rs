//! OTLP builders shared by unit tests.

use crate::core::otel::string_attribute;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::InstrumentationScope;
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{
    span::SpanKind, status::StatusCode, ResourceSpans, ScopeSpans, Span, Status,
};

pub(crate) const BASE_TIME_NANOS: u64 = 1_700_000_000_000_000_000;

pub(crate) fn resource(namespace: Option<&str>, service: &str) -> Resource {
    let mut attributes = vec![string_attribute("service.name", service)];
    if let Some(namespace) = namespace {
        attributes.push(string_attribute("service.namespace", namespace));
    }
    attributes.push(string_attribute("k8s.pod.name", format!("{}-0", service)));
    Resource {
        attributes,
        ..Default::default()
    }
}

pub(crate) fn span(trace: u8, id: u8, parent: Option<u8>, kind: SpanKind, name: &str, latency_ms: u64) -> Span {
    Span {
        trace_id: vec![trace; 16],
        span_id: vec![id; 8],
        parent_span_id: parent.map(|p| vec![p; 8]).unwrap_or_default(),
        name: name.to_string(),
        kind: kind as i32,
        start_time_unix_nano: BASE_TIME_NANOS,
        end_time_unix_nano: BASE_TIME_NANOS + latency_ms * 1_000_000,
        ..Default::default()
    }
}

pub(crate) fn failed(mut span: Span) -> Span {
    span.status = Some(Status {
        code: StatusCode::Error as i32,
        message: "boom".into(),
    });
    span
}

pub(crate) fn with_attribute(mut span: Span, key: &str, value: &str) -> Span {
    span.attributes.push(string_attribute(key, value));
    span
}

pub(crate) fn resource_spans(resource: Resource, spans: Vec<Span>) -> ResourceSpans {
    ResourceSpans {
        resource: Some(resource),
        scope_spans: vec![ScopeSpans {
            scope: Some(InstrumentationScope {
                name: "io.opentelemetry.test".into(),
                ..Default::default()
            }),
            spans,
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub(crate) fn batch(groups: Vec<ResourceSpans>) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: groups,
    }
}

/// Consumer that keeps every batch it is handed
#[derive(Default)]
pub(crate) struct RecordingConsumer {
    batches: parking_lot::Mutex<Vec<ExportTraceServiceRequest>>,
}

impl RecordingConsumer {
    pub(crate) fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub(crate) fn batches(&self) -> Vec<ExportTraceServiceRequest> {
        self.batches.lock().clone()
    }

    /// Hex id of the first span of every received batch
    pub(crate) fn trace_ids(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .filter_map(|b| b.resource_spans.first())
            .filter_map(|rs| rs.scope_spans.first())
            .filter_map(|ss| ss.spans.first())
            .map(|s| hex::encode(&s.trace_id))
            .collect()
    }
}

#[async_trait::async_trait]
impl crate::processor::TraceConsumer for RecordingConsumer {
    async fn consume_traces(&self, batch: ExportTraceServiceRequest) -> crate::core::Result<()> {
        self.batches.lock().push(batch);
        Ok(())
    }
}
