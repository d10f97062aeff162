//! End-to-end sampling tests.
//!
//! Batches enter through the OTLP receiver, flow through enrichment, metrics
//! and sampling, and come out of the recording consumer on flush.

use asserts_processor::core::ConfigBuilder;
use asserts_processor::processor::{TraceConsumer, TracesProcessor};
use asserts_processor::receiver::OtlpReceiver;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::TraceService;
use opentelemetry_proto::tonic::trace::v1::span::SpanKind;
use std::sync::Arc;
use tonic::Request;

mod common;
use common::*;

fn setup(threshold: f64) -> (OtlpReceiver, Arc<TracesProcessor>, Arc<RecordingConsumer>) {
    let config = ConfigBuilder::new()
        .latency_threshold(threshold)
        .prometheus_port(0)
        .build()
        .unwrap();
    let consumer = RecordingConsumer::new();
    let processor = Arc::new(
        TracesProcessor::new(config, Arc::clone(&consumer) as Arc<dyn TraceConsumer>).unwrap(),
    );
    (OtlpReceiver::new(Arc::clone(&processor)), processor, consumer)
}

/// Checkout trace spanning a frontend and a payment service
fn checkout(trace_num: u8, frontend_ms: u64, payment_fails: bool) -> Vec<opentelemetry_proto::tonic::trace::v1::ResourceSpans> {
    let mut charge = TestSpanBuilder::new(trace_num, 3)
        .child_of(2)
        .name("POST /charge")
        .duration_ms(frontend_ms / 2);
    if payment_fails {
        charge = charge.with_error();
    }

    vec![
        service_spans(
            "shop",
            "frontend",
            vec![
                TestSpanBuilder::new(trace_num, 1)
                    .name("GET /checkout")
                    .duration_ms(frontend_ms)
                    .build(),
                TestSpanBuilder::new(trace_num, 2)
                    .child_of(1)
                    .kind(SpanKind::Client)
                    .name("POST /charge")
                    .duration_ms(frontend_ms / 2)
                    .build(),
            ],
        ),
        service_spans("shop", "payment", vec![charge.build()]),
    ]
}

#[tokio::test]
async fn test_slow_and_failing_traces_are_forwarded() {
    let (receiver, processor, consumer) = setup(1.0);

    let mut groups = checkout(1, 2_000, false);
    groups.extend(checkout(2, 100, true));
    groups.extend(checkout(3, 100, false));
    receiver.export(Request::new(export_request(groups))).await.unwrap();

    assert_eq!(processor.sampler().flush().await, 2);
    let mut ids = consumer.trace_ids();
    ids.sort();
    assert_eq!(ids, vec![trace_id(1), trace_id(2)]);

    // a forwarded trace keeps all of its spans across both services
    for batch in consumer.batches() {
        assert_eq!(batch.resource_spans.len(), 2);
    }

    assert_eq!(processor.sampler().flush().await, 0);
    assert_eq!(consumer.batches().len(), 2);
}

#[tokio::test]
async fn test_each_request_keeps_its_slowest_traces() {
    let (receiver, processor, consumer) = setup(0.1);

    for trace_num in 1..=8u8 {
        let span = TestSpanBuilder::new(trace_num, 1)
            .name("GET /search")
            .duration_ms(200 + u64::from(trace_num) * 10)
            .build();
        let request = export_request(vec![service_spans("shop", "search", vec![span])]);
        receiver.export(Request::new(request)).await.unwrap();
    }

    // default queue bound is five traces per request
    assert_eq!(processor.sampler().flush().await, 5);
    let mut ids = consumer.trace_ids();
    ids.sort();
    let expected: Vec<String> = (4..=8u8).map(trace_id).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_metrics_follow_the_traffic() {
    let (receiver, processor, _consumer) = setup(1.0);

    let mut groups = checkout(1, 2_000, false);
    groups.extend(checkout(2, 100, true));
    receiver.export(Request::new(export_request(groups))).await.unwrap();
    processor.sampler().flush().await;

    let text = processor.metrics().gather_text().unwrap();
    assert!(text.contains(r#"asserts_trace_count_total{asserts_env="dev",asserts_site="us-west-2",namespace="shop",service="frontend"} 2"#));
    assert!(text.contains(r#"asserts_spans_count_total{asserts_env="dev",asserts_site="us-west-2"} 6"#));
    // without rules the span name is the request context
    assert!(text.contains(r#"asserts_request_context="GET /checkout""#));
    assert!(text.contains(r#"sample_type="slow""#));
    assert!(text.contains(r#"sample_type="error""#));
}

#[tokio::test]
async fn test_spans_without_service_are_ignored() {
    let (receiver, processor, consumer) = setup(0.1);

    let mut group = service_spans("shop", "ghost", vec![TestSpanBuilder::new(9, 1).duration_ms(500).build()]);
    group.resource = None;
    receiver.export(Request::new(export_request(vec![group]))).await.unwrap();

    assert_eq!(processor.sampler().flush().await, 0);
    assert!(consumer.batches().is_empty());
}
