//! Prometheus vectors recorded for every processed span.

use crate::control::ConfigListener;
use crate::core::otel::{attribute_string, attributes, latency_seconds, span_kind_name};
use crate::core::{service_key, Config, ProcessorError, Result};
use crate::metrics::cardinality::CardinalityCaches;
use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::trace::v1::Span;
use parking_lot::Mutex;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::{debug, info, trace, warn};

pub const LATENCY_HISTOGRAM: &str = "otel_span_latency_seconds";
pub const TRACE_COUNT: &str = "asserts_trace_count_total";
pub const TRACE_SAMPLED_COUNT: &str = "asserts_trace_sampled_count_total";
pub const SPANS_COUNT: &str = "asserts_spans_count_total";
pub const SPANS_SAMPLED_COUNT: &str = "asserts_spans_sampled_count_total";

pub const ENV_LABEL: &str = "asserts_env";
pub const SITE_LABEL: &str = "asserts_site";
pub const NAMESPACE_LABEL: &str = "namespace";
pub const SERVICE_LABEL: &str = "service";
pub const SPAN_KIND_LABEL: &str = "span_kind";
pub const REQUEST_CONTEXT_LABEL: &str = "asserts_request_context";
pub const REQUEST_TYPE_LABEL: &str = "asserts_request_type";
pub const ERROR_TYPE_LABEL: &str = "asserts_error_type";
pub const SAMPLE_TYPE_LABEL: &str = "sample_type";

const FIXED_HISTOGRAM_LABELS: [&str; 8] = [
    ENV_LABEL,
    SITE_LABEL,
    NAMESPACE_LABEL,
    SERVICE_LABEL,
    SPAN_KIND_LABEL,
    REQUEST_CONTEXT_LABEL,
    REQUEST_TYPE_LABEL,
    ERROR_TYPE_LABEL,
];

/// Turn an attribute name into a Prometheus label name.
pub fn sanitize_label(name: &str) -> String {
    let mut label = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        match c {
            ' ' | ',' | '\t' | '/' | '\\' | '.' | '-' | ':' | '=' | '@' | '<' | '>' => label.push('_'),
            '%' => label.push_str("_percent"),
            other => label.push(other),
        }
    }
    label
}

#[derive(Debug, Clone)]
struct CapturedAttribute {
    attribute: String,
    label: String,
}

fn captured_attributes(config: &Config) -> Vec<CapturedAttribute> {
    config
        .attributes_as_metric_labels
        .iter()
        .map(|attribute| CapturedAttribute {
            attribute: attribute.clone(),
            label: sanitize_label(attribute),
        })
        .collect()
}

fn latency_histogram(captured: &[CapturedAttribute]) -> Result<HistogramVec> {
    let mut labels: Vec<&str> = FIXED_HISTOGRAM_LABELS.to_vec();
    labels.extend(captured.iter().map(|c| c.label.as_str()));
    let opts = HistogramOpts::new(LATENCY_HISTOGRAM, "Span latency in seconds");
    Ok(HistogramVec::new(opts, &labels)?)
}

struct LatencyState {
    histogram: HistogramVec,
    captured: Vec<CapturedAttribute>,
    caches: CardinalityCaches,
}

/// Owns the registry, the latency histogram and the trace and span counters
pub struct MetricHelper {
    registry: Registry,
    latency: Mutex<LatencyState>,
    trace_count: IntCounterVec,
    trace_sampled_count: IntCounterVec,
    spans_count: IntCounterVec,
    spans_sampled_count: IntCounterVec,
}

impl MetricHelper {
    /// Build the vectors for `config`; [`MetricHelper::register`] exposes them.
    pub fn new(config: &Config) -> Result<Self> {
        let captured = captured_attributes(config);
        let histogram = latency_histogram(&captured)?;
        let service_labels = [ENV_LABEL, SITE_LABEL, NAMESPACE_LABEL, SERVICE_LABEL];

        Ok(Self {
            registry: Registry::new(),
            latency: Mutex::new(LatencyState {
                histogram,
                captured,
                caches: CardinalityCaches::new(
                    config.limit_per_service,
                    config.limit_per_request_per_service,
                ),
            }),
            trace_count: IntCounterVec::new(
                Opts::new(TRACE_COUNT, "Traces processed"),
                &service_labels,
            )?,
            trace_sampled_count: IntCounterVec::new(
                Opts::new(TRACE_SAMPLED_COUNT, "Trace segments forwarded downstream"),
                &[ENV_LABEL, SITE_LABEL, NAMESPACE_LABEL, SAMPLE_TYPE_LABEL, SERVICE_LABEL],
            )?,
            spans_count: IntCounterVec::new(
                Opts::new(SPANS_COUNT, "Spans processed"),
                &[ENV_LABEL, SITE_LABEL],
            )?,
            spans_sampled_count: IntCounterVec::new(
                Opts::new(SPANS_SAMPLED_COUNT, "Spans forwarded downstream"),
                &[ENV_LABEL, SITE_LABEL],
            )?,
        })
    }

    /// Register every vector with the registry
    pub fn register(&self) -> Result<()> {
        let latency = self.latency.lock();
        self.registry.register(Box::new(latency.histogram.clone()))?;
        self.registry.register(Box::new(self.trace_count.clone()))?;
        self.registry.register(Box::new(self.trace_sampled_count.clone()))?;
        self.registry.register(Box::new(self.spans_count.clone()))?;
        self.registry.register(Box::new(self.spans_sampled_count.clone()))?;
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current metrics in the Prometheus text format
    pub fn gather_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ProcessorError::decode(format!("metrics text: {}", e)))
    }

    /// Observe the latency of an enriched span.
    ///
    /// Spans whose request context would exceed the cardinality limits of
    /// their service are not observed.
    pub fn record_span(
        &self,
        config: &Config,
        resource_attributes: &[KeyValue],
        namespace: &str,
        service: &str,
        request: &str,
        span: &Span,
    ) {
        let kind = span_kind_name(span);
        let mut latency = self.latency.lock();

        let mut labels = Vec::with_capacity(FIXED_HISTOGRAM_LABELS.len() + latency.captured.len());
        labels.push(config.asserts_env.clone());
        labels.push(config.asserts_site.clone());
        labels.push(namespace.to_string());
        labels.push(service.to_string());
        labels.push(kind.to_string());
        labels.push(request.to_string());
        labels.push(attribute_string(&span.attributes, attributes::ASSERTS_REQUEST_TYPE).unwrap_or_default());
        labels.push(attribute_string(&span.attributes, attributes::ASSERTS_ERROR_TYPE).unwrap_or_default());
        for captured in &latency.captured {
            let value = attribute_string(&span.attributes, &captured.attribute)
                .or_else(|| attribute_string(resource_attributes, &captured.attribute))
                .unwrap_or_default();
            labels.push(value);
        }

        let key = service_key(namespace, service);
        if !latency.caches.admit(&key, kind, request, &labels) {
            trace!("Cardinality limit reached for {}, not observing {}", key, request);
            return;
        }

        let values: Vec<&str> = labels.iter().map(String::as_str).collect();
        latency
            .histogram
            .with_label_values(&values)
            .observe(latency_seconds(span));
    }

    /// Count one trace segment and its spans
    pub fn record_trace(&self, config: &Config, namespace: &str, service: &str, span_count: usize) {
        self.trace_count
            .with_label_values(&[config.asserts_env.as_str(), config.asserts_site.as_str(), namespace, service])
            .inc();
        self.spans_count
            .with_label_values(&[config.asserts_env.as_str(), config.asserts_site.as_str()])
            .inc_by(span_count as u64);
    }

    /// Count one forwarded trace segment and its spans
    pub fn record_sampled(
        &self,
        config: &Config,
        namespace: &str,
        service: &str,
        sample_type: &str,
        span_count: usize,
    ) {
        self.trace_sampled_count
            .with_label_values(&[
                config.asserts_env.as_str(),
                config.asserts_site.as_str(),
                namespace,
                sample_type,
                service,
            ])
            .inc();
        self.spans_sampled_count
            .with_label_values(&[config.asserts_env.as_str(), config.asserts_site.as_str()])
            .inc_by(span_count as u64);
    }

    fn replace_histogram(&self, latency: &mut LatencyState, latest: &Config) -> Result<()> {
        let captured = captured_attributes(latest);
        let histogram = latency_histogram(&captured)?;

        self.registry.unregister(Box::new(latency.histogram.clone()))?;
        if let Err(e) = self.registry.register(Box::new(histogram.clone())) {
            if let Err(restore) = self.registry.register(Box::new(latency.histogram.clone())) {
                warn!("Failed to restore latency histogram: {}", restore);
            }
            return Err(e.into());
        }

        latency.histogram = histogram;
        latency.captured = captured;
        latency.caches.clear();
        Ok(())
    }
}

impl ConfigListener for MetricHelper {
    fn name(&self) -> &'static str {
        "metric-helper"
    }

    fn is_updated(&self, current: &Config, latest: &Config) -> bool {
        current.attributes_as_metric_labels != latest.attributes_as_metric_labels
            || current.limit_per_service != latest.limit_per_service
            || current.limit_per_request_per_service != latest.limit_per_request_per_service
    }

    fn on_update(&self, latest: &Config) -> Result<()> {
        let mut latency = self.latency.lock();

        let labels_changed = latency
            .captured
            .iter()
            .map(|c| c.attribute.as_str())
            .ne(latest.attributes_as_metric_labels.iter().map(String::as_str));
        if labels_changed {
            self.replace_histogram(&mut *latency, latest)?;
            info!(
                "Latency histogram re-registered with attributes {:?}",
                latest.attributes_as_metric_labels
            );
        }

        let evicted = latency.caches.resize(
            latest.limit_per_service,
            latest.limit_per_request_per_service,
        );
        for labels in &evicted {
            let values: Vec<&str> = labels.iter().map(String::as_str).collect();
            if let Err(e) = latency.histogram.remove_label_values(&values) {
                debug!("Series already gone: {}", e);
            }
        }
        if !evicted.is_empty() {
            debug!("Removed {} latency series after limit change", evicted.len());
        }
        Ok(())
    }
}
