//! Common test utilities and fixtures.

#![allow(dead_code)]

use asserts_processor::core::Result;
use asserts_processor::processor::TraceConsumer;
use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value::Value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{
    span::SpanKind, status::StatusCode, ResourceSpans, ScopeSpans, Span, Status,
};
use parking_lot::Mutex;
use std::sync::Arc;

const BASE_TIME_NANOS: u64 = 1_700_000_000_000_000_000;

pub fn kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::StringValue(value.to_string())),
        }),
    }
}

/// Test fixture builder for creating OTLP spans with sensible defaults.
pub struct TestSpanBuilder {
    trace_num: u8,
    span_num: u8,
    parent: Option<u8>,
    kind: SpanKind,
    name: String,
    has_error: bool,
    duration_ms: u64,
    attributes: Vec<KeyValue>,
}

impl TestSpanBuilder {
    pub fn new(trace_num: u8, span_num: u8) -> Self {
        Self {
            trace_num,
            span_num,
            parent: None,
            kind: SpanKind::Server,
            name: "GET /".to_string(),
            has_error: false,
            duration_ms: 100,
            attributes: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn child_of(mut self, parent: u8) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_error(mut self) -> Self {
        self.has_error = true;
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.push(kv(key, value));
        self
    }

    pub fn build(self) -> Span {
        Span {
            trace_id: vec![self.trace_num; 16],
            span_id: vec![self.span_num; 8],
            parent_span_id: self.parent.map(|p| vec![p; 8]).unwrap_or_default(),
            name: self.name,
            kind: self.kind as i32,
            start_time_unix_nano: BASE_TIME_NANOS,
            end_time_unix_nano: BASE_TIME_NANOS + self.duration_ms * 1_000_000,
            attributes: self.attributes,
            status: self.has_error.then(|| Status {
                code: StatusCode::Error as i32,
                message: "failed".to_string(),
            }),
            ..Default::default()
        }
    }
}

/// Spans of one service
pub fn service_spans(namespace: &str, service: &str, spans: Vec<Span>) -> ResourceSpans {
    ResourceSpans {
        resource: Some(Resource {
            attributes: vec![kv("service.namespace", namespace), kv("service.name", service)],
            ..Default::default()
        }),
        scope_spans: vec![ScopeSpans {
            spans,
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub fn export_request(groups: Vec<ResourceSpans>) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: groups,
    }
}

/// Trace id as forwarded downstream, for a trace built with `trace_num`
pub fn trace_id(trace_num: u8) -> String {
    hex::encode([trace_num; 16])
}

/// Consumer that records every forwarded batch
#[derive(Default)]
pub struct RecordingConsumer {
    batches: Mutex<Vec<ExportTraceServiceRequest>>,
}

impl RecordingConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn batches(&self) -> Vec<ExportTraceServiceRequest> {
        self.batches.lock().clone()
    }

    /// Trace id of each forwarded batch, in arrival order
    pub fn trace_ids(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .filter_map(|batch| {
                batch
                    .resource_spans
                    .iter()
                    .flat_map(|rs| rs.scope_spans.iter())
                    .flat_map(|ss| ss.spans.iter())
                    .next()
                    .map(|span| hex::encode(&span.trace_id))
            })
            .collect()
    }

    pub fn span_names(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .flat_map(|batch| batch.resource_spans.iter())
            .flat_map(|rs| rs.scope_spans.iter())
            .flat_map(|ss| ss.spans.iter())
            .map(|span| span.name.clone())
            .collect()
    }
}

#[async_trait]
impl TraceConsumer for RecordingConsumer {
    async fn consume_traces(&self, batch: ExportTraceServiceRequest) -> Result<()> {
        self.batches.lock().push(batch);
        Ok(())
    }
}
