//! Trace reassembly.
//!
//! An OTLP batch groups spans by resource and instrumentation scope, not by
//! trace. [`build_traces`] regroups the spans of a batch into logical traces,
//! each split into one [`TraceSegment`] per service. Segments refer to spans
//! by position inside the shared batch, so reassembly and queueing never
//! copy span data; [`build_trace`] produces an owned batch for a single
//! trace when it is forwarded.

#[cfg(test)]
pub(crate) mod fixtures;

use crate::core::otel::{self, attributes, SpanRole};
use crate::core::service_key;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};
use std::collections::HashMap;
use std::sync::Arc;

/// A batch of spans as received from upstream
pub type TraceBatch = ExportTraceServiceRequest;

/// Position of a span inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanRef {
    /// Index into `resource_spans`
    pub resource: usize,
    /// Index into `scope_spans`
    pub scope: usize,
    /// Index into `spans`
    pub span: usize,
}

/// The spans one service contributed to a trace
#[derive(Debug, Clone, Default)]
pub struct TraceSegment {
    /// First resource group the service was seen in; its resource is copied on output
    pub resource_index: usize,
    /// `service.namespace`, empty when absent
    pub namespace: String,
    /// `service.name`
    pub service: String,
    /// Request context of the main span
    pub request: String,
    /// Latency of the main span
    pub latency_seconds: f64,
    /// Span without a parent
    pub root_span: Option<SpanRef>,
    /// Server and consumer spans
    pub entry_spans: Vec<SpanRef>,
    /// Client and producer spans
    pub exit_spans: Vec<SpanRef>,
    /// Everything else
    pub internal_spans: Vec<SpanRef>,
    first_boundary_span: Option<SpanRef>,
}

impl TraceSegment {
    fn new(resource_index: usize, namespace: &str, service: &str) -> Self {
        Self {
            resource_index,
            namespace: namespace.to_string(),
            service: service.to_string(),
            ..Default::default()
        }
    }

    fn add(&mut self, span_ref: SpanRef, span: &Span) {
        if otel::is_root(span) && self.root_span.is_none() {
            self.root_span = Some(span_ref);
            return;
        }
        match otel::span_role(span) {
            SpanRole::Entry => self.entry_spans.push(span_ref),
            SpanRole::Exit => self.exit_spans.push(span_ref),
            SpanRole::Internal => {
                self.internal_spans.push(span_ref);
                return;
            },
        }
        self.first_boundary_span.get_or_insert(span_ref);
    }

    /// `namespace#service`, or `service` without a namespace
    pub fn service_key(&self) -> String {
        service_key(&self.namespace, &self.service)
    }

    /// Root span, else the first entry or exit span, else the first internal span
    pub fn main_span(&self) -> Option<SpanRef> {
        self.root_span
            .or(self.first_boundary_span)
            .or_else(|| self.internal_spans.first().copied())
    }

    /// Whether the segment holds the root of the trace
    pub fn has_root_span(&self) -> bool {
        self.root_span.is_some()
    }

    /// Spans in output order: root, entry, exit, internal
    pub fn span_refs(&self) -> impl Iterator<Item = SpanRef> + '_ {
        self.root_span
            .iter()
            .chain(self.entry_spans.iter())
            .chain(self.exit_spans.iter())
            .chain(self.internal_spans.iter())
            .copied()
    }

    /// Number of spans in the segment
    pub fn span_count(&self) -> usize {
        usize::from(self.root_span.is_some())
            + self.entry_spans.len()
            + self.exit_spans.len()
            + self.internal_spans.len()
    }
}

/// Segments sharing one trace id
#[derive(Debug, Clone)]
pub struct Trace {
    batch: Arc<TraceBatch>,
    trace_id: String,
    segments: Vec<TraceSegment>,
}

impl Trace {
    /// Hex trace id
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Segments in order of first appearance
    pub fn segments(&self) -> &[TraceSegment] {
        &self.segments
    }

    /// Resolve a span reference
    pub fn span(&self, span_ref: SpanRef) -> &Span {
        &self.batch.resource_spans[span_ref.resource].scope_spans[span_ref.scope].spans[span_ref.span]
    }

    /// Resource group a segment was first seen in
    pub fn resource_spans(&self, segment: &TraceSegment) -> &ResourceSpans {
        &self.batch.resource_spans[segment.resource_index]
    }

    /// Spans of a segment in output order
    pub fn spans<'a>(&'a self, segment: &'a TraceSegment) -> impl Iterator<Item = &'a Span> + 'a {
        segment.span_refs().map(move |span_ref| self.span(span_ref))
    }

    /// Whether any span of the segment has status ERROR
    pub fn has_error(&self, segment: &TraceSegment) -> bool {
        self.spans(segment).any(otel::is_error)
    }

    /// Whether both traces were reassembled from the same batch
    pub fn same_batch(&self, other: &Trace) -> bool {
        Arc::ptr_eq(&self.batch, &other.batch)
    }

    /// Total number of spans across segments
    pub fn span_count(&self) -> usize {
        self.segments.iter().map(TraceSegment::span_count).sum()
    }
}

/// Regroup a batch into traces.
///
/// Resource groups without `service.name` are skipped. Spans of one service
/// spread over several resource groups end up in a single segment.
pub fn build_traces(batch: Arc<TraceBatch>) -> Vec<Trace> {
    let mut traces: Vec<Trace> = Vec::new();
    let mut trace_index: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut segment_index: HashMap<(usize, String), usize> = HashMap::new();

    for (resource_idx, resource_spans) in batch.resource_spans.iter().enumerate() {
        let resource_attrs = resource_spans
            .resource
            .as_ref()
            .map(|r| r.attributes.as_slice())
            .unwrap_or_default();
        let Some(service) = otel::attribute_string(resource_attrs, attributes::SERVICE_NAME) else {
            tracing::debug!("Skipping resource group {} without service.name", resource_idx);
            continue;
        };
        let namespace = otel::attribute_string(resource_attrs, attributes::SERVICE_NAMESPACE)
            .unwrap_or_default();
        let key = service_key(&namespace, &service);

        for (scope_idx, scope_spans) in resource_spans.scope_spans.iter().enumerate() {
            for (span_idx, span) in scope_spans.spans.iter().enumerate() {
                let trace_pos = *trace_index.entry(span.trace_id.clone()).or_insert_with(|| {
                    traces.push(Trace {
                        batch: Arc::clone(&batch),
                        trace_id: otel::trace_id_hex(&span.trace_id),
                        segments: Vec::new(),
                    });
                    traces.len() - 1
                });
                let trace = &mut traces[trace_pos];

                let segment_pos = *segment_index
                    .entry((trace_pos, key.clone()))
                    .or_insert_with(|| {
                        trace
                            .segments
                            .push(TraceSegment::new(resource_idx, &namespace, &service));
                        trace.segments.len() - 1
                    });

                let span_ref = SpanRef {
                    resource: resource_idx,
                    scope: scope_idx,
                    span: span_idx,
                };
                trace.segments[segment_pos].add(span_ref, span);
            }
        }
    }

    for trace in &mut traces {
        let batch = Arc::clone(&trace.batch);
        for segment in &mut trace.segments {
            if let Some(main) = segment.main_span() {
                let span =
                    &batch.resource_spans[main.resource].scope_spans[main.scope].spans[main.span];
                segment.latency_seconds = otel::latency_seconds(span);
                segment.request =
                    otel::attribute_string(&span.attributes, attributes::ASSERTS_REQUEST_CONTEXT)
                        .unwrap_or_else(|| span.name.clone());
            }
        }
    }

    traces
}

/// Build an owned batch holding exactly the spans of `trace`.
///
/// Each segment becomes one resource group carrying a copy of the original
/// resource. Spans keep their instrumentation scope: every source scope
/// group contributes one scope group, in order of first appearance when
/// walking root, entry, exit and internal spans.
pub fn build_trace(trace: &Trace) -> TraceBatch {
    let resource_spans = trace
        .segments
        .iter()
        .map(|segment| {
            let original = trace.resource_spans(segment);
            ResourceSpans {
                resource: original.resource.clone(),
                scope_spans: scope_groups(trace, segment),
                schema_url: original.schema_url.clone(),
            }
        })
        .collect();

    TraceBatch { resource_spans }
}

fn scope_groups(trace: &Trace, segment: &TraceSegment) -> Vec<ScopeSpans> {
    let mut groups: Vec<((usize, usize), ScopeSpans)> = Vec::new();
    for span_ref in segment.span_refs() {
        let source = (span_ref.resource, span_ref.scope);
        let pos = match groups.iter().position(|(key, _)| *key == source) {
            Some(pos) => pos,
            None => {
                let scope_spans = &trace.batch.resource_spans[source.0].scope_spans[source.1];
                groups.push((
                    source,
                    ScopeSpans {
                        scope: scope_spans.scope.clone(),
                        spans: Vec::new(),
                        schema_url: scope_spans.schema_url.clone(),
                    },
                ));
                groups.len() - 1
            },
        };
        groups[pos].1.spans.push(trace.span(span_ref).clone());
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

/// Build one owned batch holding every trace.
pub fn build_batch(traces: &[Trace]) -> TraceBatch {
    TraceBatch {
        resource_spans: traces
            .iter()
            .flat_map(|trace| build_trace(trace).resource_spans)
            .collect(),
    }
}
