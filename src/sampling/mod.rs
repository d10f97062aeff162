//! Latency-threshold trace sampling.
//!
//! The sampler keeps, per (service, request), the slowest and the erroring
//! traces seen since the last flush. Slowness is judged against thresholds
//! the [`ThresholdHelper`] fetches from the control plane.

pub mod queue;
pub mod sampler;
pub mod threshold;

pub use queue::{QueueItem, TraceQueue};
pub use sampler::{PerRequestSampler, ServiceQueues, TraceSampler};
pub use threshold::ThresholdHelper;

use std::fmt;

/// Why a trace segment was forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    /// Root span slower than the request threshold
    Slow,
    /// At least one span with status ERROR
    Error,
    /// Periodic sample of an otherwise unremarkable request
    Periodic,
    /// Forwarded along with a sampled segment of the same trace
    Normal,
}

impl SampleType {
    /// Value of the `sample_type` metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleType::Slow => "slow",
            SampleType::Error => "error",
            SampleType::Periodic => "periodic",
            SampleType::Normal => "normal",
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
