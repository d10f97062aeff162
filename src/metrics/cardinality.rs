//! Per-service bounds on histogram label cardinality.
//!
//! Every service may own at most `limit_per_service` request contexts, and
//! every (service, span kind) pair at most `limit_per_kind` of them. The
//! label sets observed for each admitted context are remembered so their
//! series can be deleted when a lowered limit evicts the context.

use lru::LruCache;
use std::collections::{HashMap, HashSet};

/// Label values of one histogram series
pub type LabelValues = Vec<String>;

/// Series observed for one request context, by span kind
type KindSeries = HashMap<String, HashSet<LabelValues>>;

struct ServiceCardinality {
    contexts: LruCache<String, KindSeries>,
    by_kind: HashMap<String, LruCache<String, ()>>,
}

impl ServiceCardinality {
    fn new() -> Self {
        Self {
            contexts: LruCache::unbounded(),
            by_kind: HashMap::new(),
        }
    }
}

/// Request-context caches of every service seen
pub struct CardinalityCaches {
    services: HashMap<String, ServiceCardinality>,
    limit_per_service: usize,
    limit_per_kind: usize,
}

impl CardinalityCaches {
    pub fn new(limit_per_service: usize, limit_per_kind: usize) -> Self {
        Self {
            services: HashMap::new(),
            limit_per_service,
            limit_per_kind,
        }
    }

    /// Admit a series for `request` under `service_key` and `kind`.
    ///
    /// Known contexts are always admitted and marked as recently used. A new
    /// context is refused once the service or its span kind is at capacity.
    pub fn admit(&mut self, service_key: &str, kind: &str, request: &str, labels: &[String]) -> bool {
        let service = self
            .services
            .entry(service_key.to_string())
            .or_insert_with(ServiceCardinality::new);

        let known_context = service.contexts.contains(request);
        if !known_context && service.contexts.len() >= self.limit_per_service {
            return false;
        }

        let kind_cache = service
            .by_kind
            .entry(kind.to_string())
            .or_insert_with(LruCache::unbounded);
        if kind_cache.get(request).is_none() {
            if kind_cache.len() >= self.limit_per_kind {
                return false;
            }
            kind_cache.put(request.to_string(), ());
        }

        if !known_context {
            service.contexts.put(request.to_string(), KindSeries::new());
        }
        let Some(series) = service.contexts.get_mut(request) else {
            return false;
        };
        let label_sets = series.entry(kind.to_string()).or_default();
        if !label_sets.contains(labels) {
            label_sets.insert(labels.to_vec());
        }
        true
    }

    /// Apply new limits, returning the label sets of every evicted series.
    pub fn resize(&mut self, limit_per_service: usize, limit_per_kind: usize) -> Vec<LabelValues> {
        self.limit_per_service = limit_per_service;
        self.limit_per_kind = limit_per_kind;

        let mut evicted = Vec::new();
        for service in self.services.values_mut() {
            while service.contexts.len() > limit_per_service {
                let Some((request, series)) = service.contexts.pop_lru() else {
                    break;
                };
                for kind_cache in service.by_kind.values_mut() {
                    kind_cache.pop(&request);
                }
                evicted.extend(series.into_values().flatten());
            }

            for (kind, kind_cache) in service.by_kind.iter_mut() {
                while kind_cache.len() > limit_per_kind {
                    let Some((request, ())) = kind_cache.pop_lru() else {
                        break;
                    };
                    let now_empty = match service.contexts.peek_mut(&request) {
                        Some(series) => {
                            evicted.extend(series.remove(kind).into_iter().flatten());
                            series.is_empty()
                        },
                        None => false,
                    };
                    if now_empty {
                        service.contexts.pop(&request);
                    }
                }
            }
        }
        evicted
    }

    /// Forget every service
    pub fn clear(&mut self) {
        self.services.clear();
    }

    /// Number of request contexts held for `service_key`
    pub fn context_count(&self, service_key: &str) -> usize {
        self.services
            .get(service_key)
            .map(|s| s.contexts.len())
            .unwrap_or(0)
    }

    pub fn limits(&self) -> (usize, usize) {
        (self.limit_per_service, self.limit_per_kind)
    }
}
