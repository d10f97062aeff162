//! Per-(service, request) trace sampling.
//!
//! Each request of a service owns a slow queue and an error queue holding
//! its most interesting traces since the last flush, and a periodic stamp
//! that lets one otherwise unremarkable trace through per interval. A
//! service holds at most `limit_per_service` requests; traces of further
//! requests still produce metrics but are never queued.

use crate::control::ConfigListener;
use crate::core::{Config, EntityKey, RequestKey, Result};
use crate::metrics::MetricHelper;
use crate::processor::TraceConsumer;
use crate::sampling::queue::{QueueItem, TraceQueue, MAX_QUEUE_CAPACITY};
use crate::sampling::{SampleType, ThresholdHelper};
use crate::trace::{build_trace, Trace, TraceSegment};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Sampling state of one request
#[derive(Debug)]
pub struct PerRequestSampler {
    slow: TraceQueue,
    errors: TraceQueue,
    last_sample: Mutex<Instant>,
}

impl PerRequestSampler {
    fn new(now: Instant) -> Self {
        Self {
            slow: TraceQueue::new(),
            errors: TraceQueue::new(),
            last_sample: Mutex::new(now),
        }
    }

    /// True at most once per `interval`
    fn take_periodic(&self, now: Instant, interval: Duration) -> bool {
        let mut last = self.last_sample.lock();
        if now.saturating_duration_since(*last) >= interval {
            *last = now;
            true
        } else {
            false
        }
    }

    fn is_empty(&self) -> bool {
        self.slow.is_empty() && self.errors.is_empty()
    }

    pub fn slow_len(&self) -> usize {
        self.slow.len()
    }

    pub fn error_len(&self) -> usize {
        self.errors.len()
    }
}

/// Per-request states of one service
#[derive(Debug, Default)]
pub struct ServiceQueues {
    requests: RwLock<HashMap<String, Arc<PerRequestSampler>>>,
}

impl ServiceQueues {
    /// State of `request`, created when the service has room for it
    fn get_or_create(&self, request: &str, limit: usize, now: Instant) -> Option<Arc<PerRequestSampler>> {
        if let Some(state) = self.requests.read().get(request) {
            return Some(Arc::clone(state));
        }

        let mut requests = self.requests.write();
        if let Some(state) = requests.get(request) {
            return Some(Arc::clone(state));
        }
        if requests.len() >= limit {
            return None;
        }
        let state = Arc::new(PerRequestSampler::new(now));
        requests.insert(request.to_string(), Arc::clone(&state));
        Some(state)
    }

    /// Number of distinct requests held
    pub fn request_count(&self) -> usize {
        self.requests.read().len()
    }

    pub fn get(&self, request: &str) -> Option<Arc<PerRequestSampler>> {
        self.requests.read().get(request).map(Arc::clone)
    }

    fn drain(&self) -> Vec<QueueItem> {
        let requests = self.requests.read();
        let mut items = Vec::new();
        for state in requests.values() {
            items.extend(state.errors.drain());
            items.extend(state.slow.drain());
        }
        items
    }

    /// Drop requests beyond `limit`, idle ones first
    fn shrink(&self, limit: usize) -> usize {
        let mut requests = self.requests.write();
        let excess = requests.len().saturating_sub(limit);
        if excess == 0 {
            return 0;
        }
        let mut victims: Vec<(bool, String)> = requests
            .iter()
            .map(|(request, state)| (!state.is_empty(), request.clone()))
            .collect();
        victims.sort();
        for (_, request) in victims.into_iter().take(excess) {
            requests.remove(&request);
        }
        excess
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SamplerSettings {
    limit_per_service: usize,
    limit_per_request: usize,
    periodic_interval: Duration,
}

impl SamplerSettings {
    fn from_config(config: &Config) -> Self {
        Self {
            limit_per_service: config.limit_per_service,
            limit_per_request: config.limit_per_request_per_service,
            periodic_interval: config.periodic_sampling_interval(),
        }
    }

    fn queue_capacity(&self) -> usize {
        self.limit_per_request.min(MAX_QUEUE_CAPACITY)
    }
}

/// Decides which traces are forwarded and forwards them on flush
pub struct TraceSampler {
    config: Arc<ArcSwap<Config>>,
    settings: RwLock<SamplerSettings>,
    thresholds: Arc<ThresholdHelper>,
    metrics: Arc<MetricHelper>,
    consumer: Arc<dyn TraceConsumer>,
    services: DashMap<String, Arc<ServiceQueues>>,
}

/// A trace selected by a flush, with the reason each segment was sampled
struct Selected {
    item: QueueItem,
    triggers: HashMap<usize, SampleType>,
}

impl Selected {
    /// Keep the slowest occurrence of a trace. Segment indices are only
    /// comparable between occurrences reassembled from the same batch.
    fn from_items(items: Vec<QueueItem>) -> Option<Self> {
        let winner = items
            .iter()
            .enumerate()
            .fold(None::<(usize, f64)>, |best, (i, item)| match best {
                Some((_, latency)) if latency >= item.latency_seconds => best,
                _ => Some((i, item.latency_seconds)),
            })?
            .0;

        let mut triggers = HashMap::new();
        for item in &items {
            if item.trace.same_batch(&items[winner].trace) {
                triggers.entry(item.segment).or_insert(item.sample_type);
            }
        }
        let item = items.into_iter().nth(winner)?;
        Some(Self { item, triggers })
    }
}

impl TraceSampler {
    pub fn new(
        config: Arc<ArcSwap<Config>>,
        thresholds: Arc<ThresholdHelper>,
        metrics: Arc<MetricHelper>,
        consumer: Arc<dyn TraceConsumer>,
    ) -> Self {
        let settings = SamplerSettings::from_config(&config.load());
        Self {
            config,
            settings: RwLock::new(settings),
            thresholds,
            metrics,
            consumer,
            services: DashMap::new(),
        }
    }

    /// Queue the segments of `trace` that are slow, erroring or due for a periodic sample
    pub fn sample_trace(&self, trace: &Trace) {
        let settings = *self.settings.read();
        let now = Instant::now();

        for (index, segment) in trace.segments().iter().enumerate() {
            let slow = self.is_slow(segment);
            let error = trace.has_error(segment);

            let Some(state) = self.request_state(segment, settings.limit_per_service, now) else {
                if tracing::enabled!(tracing::Level::TRACE) {
                    let config = self.config.load();
                    let entity = EntityKey::service(
                        &config.asserts_env,
                        &config.asserts_site,
                        &segment.namespace,
                        &segment.service,
                    );
                    trace!("Request limit reached, not sampling {}", RequestKey::new(entity, segment.request.as_str()));
                }
                continue;
            };

            let periodic = !slow && !error && state.take_periodic(now, settings.periodic_interval);
            let capacity = settings.queue_capacity();

            if slow || periodic {
                let sample_type = if slow { SampleType::Slow } else { SampleType::Periodic };
                let item = QueueItem::new(trace.clone(), index, segment.latency_seconds, sample_type);
                state.slow.push(item, capacity);
            }
            if error {
                let item = QueueItem::new(trace.clone(), index, segment.latency_seconds, SampleType::Error);
                state.errors.push(item, capacity);
            }
        }
    }

    fn is_slow(&self, segment: &TraceSegment) -> bool {
        if !segment.has_root_span() {
            return false;
        }
        let threshold = self
            .thresholds
            .get_threshold(&segment.namespace, &segment.service, &segment.request);
        segment.latency_seconds > threshold
    }

    fn request_state(
        &self,
        segment: &TraceSegment,
        limit: usize,
        now: Instant,
    ) -> Option<Arc<PerRequestSampler>> {
        let key = segment.service_key();
        let queues = match self.services.get(&key) {
            Some(queues) => Arc::clone(queues.value()),
            None => Arc::clone(self.services.entry(key).or_default().value()),
        };
        queues.get_or_create(&segment.request, limit, now)
    }

    /// Queues of one service
    pub fn service_queues(&self, service_key: &str) -> Option<Arc<ServiceQueues>> {
        self.services.get(service_key).map(|q| Arc::clone(q.value()))
    }

    /// Drain every queue and forward the selected traces.
    /// Returns the number of traces forwarded.
    pub async fn flush(&self) -> usize {
        let queues: Vec<Arc<ServiceQueues>> = self.services.iter().map(|e| Arc::clone(e.value())).collect();

        let mut grouped: Vec<Vec<QueueItem>> = Vec::new();
        let mut by_trace_id: HashMap<String, usize> = HashMap::new();
        for service in queues {
            for item in service.drain() {
                match by_trace_id.get(item.trace.trace_id()) {
                    Some(&pos) => grouped[pos].push(item),
                    None => {
                        by_trace_id.insert(item.trace.trace_id().to_string(), grouped.len());
                        grouped.push(vec![item]);
                    },
                }
            }
        }
        let selected: Vec<Selected> = grouped.into_iter().filter_map(Selected::from_items).collect();

        if selected.is_empty() {
            return 0;
        }

        let config = self.config.load_full();
        let mut forwarded = 0;
        for Selected { item, triggers } in selected {
            let trace = &item.trace;
            if let Err(e) = self.consumer.consume_traces(build_trace(trace)).await {
                warn!("Failed to forward trace {}: {}", trace.trace_id(), e);
                continue;
            }

            forwarded += 1;
            for (index, segment) in trace.segments().iter().enumerate() {
                let sample_type = triggers.get(&index).copied().unwrap_or(SampleType::Normal);
                self.metrics.record_sampled(
                    &config,
                    &segment.namespace,
                    &segment.service,
                    sample_type.as_str(),
                    segment.span_count(),
                );
            }
        }

        debug!("Flushed {} sampled traces", forwarded);
        forwarded
    }

    /// Flush on every tick until the stop signal fires
    pub async fn run(self: Arc<Self>, period: Duration, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush().await;
                }
                _ = stop.changed() => {
                    info!("Trace flush loop stopped");
                    break;
                }
            }
        }
    }
}

impl ConfigListener for TraceSampler {
    fn name(&self) -> &'static str {
        "trace-sampler"
    }

    fn is_updated(&self, current: &Config, latest: &Config) -> bool {
        SamplerSettings::from_config(current) != SamplerSettings::from_config(latest)
    }

    fn on_update(&self, latest: &Config) -> Result<()> {
        let settings = SamplerSettings::from_config(latest);
        *self.settings.write() = settings;

        let mut dropped = 0;
        for entry in self.services.iter() {
            dropped += entry.value().shrink(settings.limit_per_service);
        }
        if dropped > 0 {
            info!("Dropped {} request states above the new service limit", dropped);
        }
        Ok(())
    }
}
