//! The trace processor.
//!
//! [`TracesProcessor`] wires enrichment, metrics and sampling together and
//! owns the background loops: trace flush, threshold sync, configuration
//! refresh and the `/metrics` endpoint.

use crate::control::{ConfigListener, ConfigRefresh, ControlPlaneClient};
use crate::core::otel::{attribute_string, attributes};
use crate::core::{Config, Result};
use crate::enrich::{RequestContextBuilder, SpanEnricher};
use crate::metrics::{server as metrics_server, MetricHelper};
use crate::sampling::{ThresholdHelper, TraceSampler};
use crate::trace::{build_traces, TraceBatch};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Receives sampled traces
#[async_trait]
pub trait TraceConsumer: Send + Sync {
    /// Accept one batch holding a single sampled trace
    async fn consume_traces(&self, batch: TraceBatch) -> Result<()>;
}

/// Inline span enrichment, RED metrics and trace sampling
pub struct TracesProcessor {
    config: Arc<ArcSwap<Config>>,
    enricher: Arc<SpanEnricher>,
    metrics: Arc<MetricHelper>,
    thresholds: Arc<ThresholdHelper>,
    sampler: Arc<TraceSampler>,
    refresh: Arc<ConfigRefresh>,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TracesProcessor {
    /// Validate `config` and build every component.
    pub fn new(config: Config, consumer: Arc<dyn TraceConsumer>) -> Result<Self> {
        config.validate()?;

        let client = config
            .asserts_server
            .as_ref()
            .map(ControlPlaneClient::new)
            .transpose()?;

        let request_context = Arc::new(RequestContextBuilder::new(&config)?);
        let enricher = Arc::new(SpanEnricher::new(&config, Arc::clone(&request_context))?);
        let metrics = Arc::new(MetricHelper::new(&config)?);
        metrics.register()?;
        let thresholds = Arc::new(ThresholdHelper::new(&config, client.clone()));

        let current = Arc::new(ArcSwap::from_pointee(config));
        let sampler = Arc::new(TraceSampler::new(
            Arc::clone(&current),
            Arc::clone(&thresholds),
            Arc::clone(&metrics),
            consumer,
        ));

        let mut refresh = ConfigRefresh::new(Arc::clone(&current), client);
        refresh.register(Arc::clone(&metrics) as Arc<dyn ConfigListener>);
        refresh.register(request_context as Arc<dyn ConfigListener>);
        refresh.register(Arc::clone(&enricher) as Arc<dyn ConfigListener>);
        refresh.register(Arc::clone(&thresholds) as Arc<dyn ConfigListener>);
        refresh.register(Arc::clone(&sampler) as Arc<dyn ConfigListener>);

        let (stop, _) = watch::channel(false);

        Ok(Self {
            config: current,
            enricher,
            metrics,
            thresholds,
            sampler,
            refresh: Arc::new(refresh),
            stop,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Enrich, measure and sample one batch. Returns the number of traces seen.
    pub fn consume_traces(&self, mut batch: TraceBatch) -> usize {
        let config = self.config.load_full();

        for resource_spans in &mut batch.resource_spans {
            let resource_attrs = resource_spans
                .resource
                .as_ref()
                .map(|r| r.attributes.as_slice())
                .unwrap_or_default();
            let Some(service) = attribute_string(resource_attrs, attributes::SERVICE_NAME) else {
                continue;
            };
            let namespace =
                attribute_string(resource_attrs, attributes::SERVICE_NAMESPACE).unwrap_or_default();

            for scope_spans in &mut resource_spans.scope_spans {
                for span in &mut scope_spans.spans {
                    self.enricher.enrich_span(&namespace, &service, span);
                }
            }
        }

        let batch = Arc::new(batch);
        let traces = build_traces(Arc::clone(&batch));

        for trace in &traces {
            for segment in trace.segments() {
                for span_ref in segment.span_refs() {
                    let span = trace.span(span_ref);
                    let resource_attrs = batch.resource_spans[span_ref.resource]
                        .resource
                        .as_ref()
                        .map(|r| r.attributes.as_slice())
                        .unwrap_or_default();
                    let request = attribute_string(&span.attributes, attributes::ASSERTS_REQUEST_CONTEXT)
                        .unwrap_or_else(|| span.name.clone());
                    self.metrics.record_span(
                        &config,
                        resource_attrs,
                        &segment.namespace,
                        &segment.service,
                        &request,
                        span,
                    );
                }
                self.metrics
                    .record_trace(&config, &segment.namespace, &segment.service, segment.span_count());
            }
            self.sampler.sample_trace(trace);
        }

        debug!("Processed batch with {} traces", traces.len());
        traces.len()
    }

    /// Spawn the background loops and the metrics endpoint
    pub async fn start(&self) -> Result<()> {
        let config = self.config.load_full();
        let mut tasks = Vec::new();

        let sampler = Arc::clone(&self.sampler);
        tasks.push(tokio::spawn(
            sampler.run(config.trace_flush_interval(), self.stop.subscribe()),
        ));

        if config.asserts_server.is_some() {
            let thresholds = Arc::clone(&self.thresholds);
            tasks.push(tokio::spawn(
                thresholds.run(config.threshold_sync_interval(), self.stop.subscribe()),
            ));

            let refresh = Arc::clone(&self.refresh);
            tasks.push(tokio::spawn(
                refresh.run(config.config_refresh_interval(), self.stop.subscribe()),
            ));
        } else {
            info!("No control plane configured, using local thresholds and configuration");
        }

        if config.prometheus_exporter_port != 0 {
            let listener = metrics_server::bind(config.prometheus_exporter_port).await?;
            let metrics = Arc::clone(&self.metrics);
            let stop = self.stop.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = metrics_server::serve(metrics, listener, stop).await {
                    error!("Metrics endpoint stopped: {}", e);
                }
            }));
        }

        info!("Processor started with {} background tasks", tasks.len());
        self.tasks.lock().extend(tasks);
        Ok(())
    }

    /// Stop every background task and wait for it. Unflushed traces are dropped.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!("Processor stopped");
    }

    /// Active configuration
    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    pub fn metrics(&self) -> &Arc<MetricHelper> {
        &self.metrics
    }

    pub fn thresholds(&self) -> &Arc<ThresholdHelper> {
        &self.thresholds
    }

    pub fn sampler(&self) -> &Arc<TraceSampler> {
        &self.sampler
    }

    pub fn refresh(&self) -> &Arc<ConfigRefresh> {
        &self.refresh
    }
}
