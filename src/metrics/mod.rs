//! RED metrics derived from spans.
//!
//! [`MetricHelper`] owns a dedicated Prometheus registry with the span
//! latency histogram and the trace and span counters. The histogram's
//! request-context label is bounded per service by [`CardinalityCaches`].

pub mod cardinality;
pub mod helper;
pub mod server;

pub use cardinality::CardinalityCaches;
pub use helper::{sanitize_label, MetricHelper};
