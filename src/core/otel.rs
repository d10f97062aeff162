//! Helpers over the OTLP protobuf span model.

use opentelemetry_proto::tonic::common::v1::{any_value::Value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::trace::v1::{
    span::SpanKind as ProtoSpanKind, status::StatusCode as ProtoStatusCode, Span,
};

/// Attribute keys read or written by the processor.
pub mod attributes {
    pub const SERVICE_NAME: &str = "service.name";
    pub const SERVICE_NAMESPACE: &str = "service.namespace";

    pub const ASSERTS_REQUEST_TYPE: &str = "asserts.request.type";
    pub const ASSERTS_ERROR_TYPE: &str = "asserts.error.type";
    pub const ASSERTS_REQUEST_CONTEXT: &str = "asserts.request.context";
}

/// Coarse classification of a span by its kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanRole {
    /// Server or Consumer
    Entry,
    /// Client or Producer
    Exit,
    /// Everything else
    Internal,
}

/// Name of the span kind as used in matcher rules and metric labels.
#[inline]
pub fn span_kind_name(span: &Span) -> &'static str {
    match ProtoSpanKind::try_from(span.kind) {
        Ok(ProtoSpanKind::Internal) => "Internal",
        Ok(ProtoSpanKind::Server) => "Server",
        Ok(ProtoSpanKind::Client) => "Client",
        Ok(ProtoSpanKind::Producer) => "Producer",
        Ok(ProtoSpanKind::Consumer) => "Consumer",
        Ok(ProtoSpanKind::Unspecified) | Err(_) => "Unspecified",
    }
}

/// Classify a span as entry, exit or internal.
#[inline]
pub fn span_role(span: &Span) -> SpanRole {
    match ProtoSpanKind::try_from(span.kind) {
        Ok(ProtoSpanKind::Server) | Ok(ProtoSpanKind::Consumer) => SpanRole::Entry,
        Ok(ProtoSpanKind::Client) | Ok(ProtoSpanKind::Producer) => SpanRole::Exit,
        _ => SpanRole::Internal,
    }
}

/// True when the span has no parent in its trace.
#[inline]
pub fn is_root(span: &Span) -> bool {
    span.parent_span_id.is_empty()
}

/// True when the span status code is ERROR.
#[inline]
pub fn is_error(span: &Span) -> bool {
    span.status
        .as_ref()
        .map(|status| status.code == ProtoStatusCode::Error as i32)
        .unwrap_or(false)
}

/// Span duration in seconds; zero when the end precedes the start.
#[inline]
pub fn latency_seconds(span: &Span) -> f64 {
    let nanos = span.end_time_unix_nano.saturating_sub(span.start_time_unix_nano);
    nanos as f64 / 1e9
}

/// Lowercase hex rendering of a trace id.
pub fn trace_id_hex(trace_id: &[u8]) -> String {
    hex::encode(trace_id)
}

/// Look up an attribute value by key.
pub fn attribute<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a AnyValue> {
    attributes
        .iter()
        .find(|kv| kv.key == key)
        .and_then(|kv| kv.value.as_ref())
}

/// Look up an attribute and render it as a string.
pub fn attribute_string(attributes: &[KeyValue], key: &str) -> Option<String> {
    attribute(attributes, key).map(any_value_string)
}

/// Render an attribute value the way it would be compared against a regex.
pub fn any_value_string(value: &AnyValue) -> String {
    match &value.value {
        Some(Value::StringValue(s)) => s.clone(),
        Some(Value::BoolValue(b)) => b.to_string(),
        Some(Value::IntValue(i)) => i.to_string(),
        Some(Value::DoubleValue(d)) => d.to_string(),
        Some(Value::BytesValue(bytes)) => hex::encode(bytes),
        Some(Value::ArrayValue(array)) => {
            let items: Vec<String> = array.values.iter().map(any_value_string).collect();
            format!("[{}]", items.join(","))
        },
        Some(Value::KvlistValue(list)) => {
            let items: Vec<String> = list
                .values
                .iter()
                .map(|kv| {
                    let value = kv.value.as_ref().map(any_value_string).unwrap_or_default();
                    format!("{}={}", kv.key, value)
                })
                .collect();
            format!("{{{}}}", items.join(","))
        },
        None => String::new(),
    }
}

/// Insert or overwrite a string attribute.
pub fn upsert_string_attribute(attributes: &mut Vec<KeyValue>, key: &str, value: impl Into<String>) {
    let value = Some(AnyValue {
        value: Some(Value::StringValue(value.into())),
    });
    match attributes.iter_mut().find(|kv| kv.key == key) {
        Some(existing) => existing.value = value,
        None => attributes.push(KeyValue {
            key: key.to_string(),
            value,
        }),
    }
}

/// Build a string key/value pair.
pub fn string_attribute(key: &str, value: impl Into<String>) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::StringValue(value.into())),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::trace::v1::Status;

    #[test]
    fn test_span_roles() {
        let mut span = Span {
            kind: ProtoSpanKind::Server as i32,
            ..Default::default()
        };
        assert_eq!(span_role(&span), SpanRole::Entry);
        assert_eq!(span_kind_name(&span), "Server");

        span.kind = ProtoSpanKind::Producer as i32;
        assert_eq!(span_role(&span), SpanRole::Exit);

        span.kind = ProtoSpanKind::Unspecified as i32;
        assert_eq!(span_role(&span), SpanRole::Internal);
        assert_eq!(span_kind_name(&span), "Unspecified");

        span.kind = 42;
        assert_eq!(span_role(&span), SpanRole::Internal);
    }

    #[test]
    fn test_error_status() {
        let mut span = Span::default();
        assert!(!is_error(&span));
        span.status = Some(Status {
            code: ProtoStatusCode::Error as i32,
            ..Default::default()
        });
        assert!(is_error(&span));
    }

    #[test]
    fn test_latency() {
        let span = Span {
            start_time_unix_nano: 1_000_000_000,
            end_time_unix_nano: 1_600_000_000,
            ..Default::default()
        };
        assert!((latency_seconds(&span) - 0.6).abs() < 1e-9);

        let inverted = Span {
            start_time_unix_nano: 10,
            end_time_unix_nano: 5,
            ..Default::default()
        };
        assert_eq!(latency_seconds(&inverted), 0.0);
    }

    #[test]
    fn test_attribute_rendering() {
        let attrs = vec![
            string_attribute("http.url", "https://x/foo"),
            KeyValue {
                key: "http.status_code".into(),
                value: Some(AnyValue {
                    value: Some(Value::IntValue(503)),
                }),
            },
        ];
        assert_eq!(attribute_string(&attrs, "http.url").as_deref(), Some("https://x/foo"));
        assert_eq!(attribute_string(&attrs, "http.status_code").as_deref(), Some("503"));
        assert_eq!(attribute_string(&attrs, "missing"), None);
    }

    #[test]
    fn test_upsert_overwrites() {
        let mut attrs = vec![string_attribute("asserts.request.type", "old")];
        upsert_string_attribute(&mut attrs, "asserts.request.type", "inbound");
        upsert_string_attribute(&mut attrs, "asserts.error.type", "server_errors");
        assert_eq!(attrs.len(), 2);
        assert_eq!(attribute_string(&attrs, "asserts.request.type").as_deref(), Some("inbound"));
    }
}
