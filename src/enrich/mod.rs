//! Span enrichment: request type, error type and request context.

pub mod request_context;
pub mod span_enricher;

pub use request_context::RequestContextBuilder;
pub use span_enricher::SpanEnricher;
