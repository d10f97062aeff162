//! Bounded latency-ordered trace queue.
//!
//! A min-heap keyed on latency: pushing past capacity drops the fastest
//! trace, so the queue always holds the slowest traces seen since it was
//! last drained. Among equal latencies the most recently pushed trace is
//! dropped first.

use crate::sampling::SampleType;
use crate::trace::Trace;
use parking_lot::RwLock;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Most traces a per-request queue ever holds
pub const MAX_QUEUE_CAPACITY: usize = 5;

/// A queued trace and the segment that triggered the sample
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub trace: Trace,
    /// Index of the triggering segment in `trace.segments()`
    pub segment: usize,
    pub latency_seconds: f64,
    pub sample_type: SampleType,
    seq: u64,
}

impl QueueItem {
    pub fn new(trace: Trace, segment: usize, latency_seconds: f64, sample_type: SampleType) -> Self {
        Self {
            trace,
            segment,
            latency_seconds,
            sample_type,
            seq: 0,
        }
    }
}

// Heap order: smallest latency on top, later insertion on top among ties.
// BinaryHeap is a max-heap, so the ordering is inverted.
impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        let this = (self.latency_seconds, Reverse(self.seq));
        let that = (other.latency_seconds, Reverse(other.seq));
        that.0
            .total_cmp(&this.0)
            .then_with(|| that.1.cmp(&this.1))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueItem {}

#[derive(Debug, Default)]
struct Heap {
    items: BinaryHeap<QueueItem>,
    next_seq: u64,
}

/// Bounded top-N queue of traces by latency
#[derive(Debug, Default)]
pub struct TraceQueue {
    heap: RwLock<Heap>,
}

impl TraceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `item`, evicting the fastest trace when above `capacity`.
    /// Returns the evicted item, which may be `item` itself.
    pub fn push(&self, mut item: QueueItem, capacity: usize) -> Option<QueueItem> {
        let mut heap = self.heap.write();
        item.seq = heap.next_seq;
        heap.next_seq += 1;
        heap.items.push(item);
        if heap.items.len() > capacity {
            heap.items.pop()
        } else {
            None
        }
    }

    /// Remove and return every queued item, slowest first
    pub fn drain(&self) -> Vec<QueueItem> {
        let items = std::mem::take(&mut self.heap.write().items);
        // ascending heap order is slowest first
        items.into_sorted_vec()
    }

    pub fn len(&self) -> usize {
        self.heap.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.read().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{build_traces, fixtures::*};
    use opentelemetry_proto::tonic::trace::v1::span::SpanKind;
    use std::sync::Arc;

    fn traces(latencies_ms: &[u64]) -> Vec<Trace> {
        let spans = latencies_ms
            .iter()
            .enumerate()
            .map(|(i, ms)| span(i as u8 + 1, 1, None, SpanKind::Server, "GET /", *ms))
            .collect();
        build_traces(Arc::new(batch(vec![resource_spans(resource(None, "api"), spans)])))
    }

    fn item(trace: &Trace) -> QueueItem {
        let latency = trace.segments()[0].latency_seconds;
        QueueItem::new(trace.clone(), 0, latency, SampleType::Slow)
    }

    fn latencies(items: &[QueueItem]) -> Vec<u64> {
        items
            .iter()
            .map(|i| (i.latency_seconds * 1000.0).round() as u64)
            .collect()
    }

    #[test]
    fn test_keeps_top_n_latencies() {
        let queue = TraceQueue::new();
        let observed = [40, 10, 90, 20, 70, 30, 80, 50];
        for trace in traces(&observed) {
            queue.push(item(&trace), 3);
            assert!(queue.len() <= 3);
        }
        assert_eq!(latencies(&queue.drain()), vec![90, 80, 70]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_evicts_minimum() {
        let queue = TraceQueue::new();
        let all = traces(&[30, 10, 20, 5, 40]);
        for trace in &all[..3] {
            assert!(queue.push(item(trace), 3).is_none());
        }

        // a faster trace is evicted immediately
        let evicted = queue.push(item(&all[3]), 3).unwrap();
        assert_eq!(latencies(&[evicted]), vec![5]);

        let evicted = queue.push(item(&all[4]), 3).unwrap();
        assert_eq!(latencies(&[evicted]), vec![10]);
        assert_eq!(latencies(&queue.drain()), vec![40, 30, 20]);
    }

    #[test]
    fn test_ties_keep_earlier_insertion() {
        let queue = TraceQueue::new();
        let all = traces(&[50, 50, 50]);
        queue.push(item(&all[0]), 2);
        queue.push(item(&all[1]), 2);
        let evicted = queue.push(item(&all[2]), 2).unwrap();
        assert_eq!(evicted.trace.trace_id(), all[2].trace_id());

        let kept: Vec<String> = queue.drain().iter().map(|i| i.trace.trace_id().to_string()).collect();
        assert!(kept.contains(&all[0].trace_id().to_string()));
        assert!(kept.contains(&all[1].trace_id().to_string()));
    }

    #[test]
    fn test_drain_empties_queue() {
        let queue = TraceQueue::new();
        for trace in traces(&[1, 2]) {
            queue.push(item(&trace), 5);
        }
        assert_eq!(queue.drain().len(), 2);
        assert!(queue.drain().is_empty());
    }
}
