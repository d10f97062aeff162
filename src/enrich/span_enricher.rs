//! Span enrichment.
//!
//! Adds `asserts.request.type`, `asserts.error.type` and
//! `asserts.request.context` to spans. These three keys are the only
//! modification the processor makes to the data it forwards.

use crate::control::ConfigListener;
use crate::core::otel::{any_value_string, attributes, span_role, upsert_string_attribute, SpanRole};
use crate::core::{service_key, Config, ErrorTypeConfig, ProcessorError, Result};
use crate::enrich::RequestContextBuilder;
use arc_swap::ArcSwap;
use opentelemetry_proto::tonic::trace::v1::Span;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Request type of inbound spans
pub const REQUEST_TYPE_INBOUND: &str = "inbound";
/// Request type of outbound spans
pub const REQUEST_TYPE_OUTBOUND: &str = "outbound";

#[derive(Debug)]
struct ErrorTypeRule {
    value_regex: Regex,
    error_type: String,
}

type ErrorTypeRules = HashMap<String, Vec<ErrorTypeRule>>;

fn compile_error_rules(config: &HashMap<String, Vec<ErrorTypeConfig>>) -> Result<ErrorTypeRules> {
    let mut compiled = HashMap::with_capacity(config.len());
    for (attr_name, rules) in config {
        let mut list = Vec::with_capacity(rules.len());
        for rule in rules {
            let value_regex = Regex::new(&rule.value_match_regex)
                .map_err(|e| ProcessorError::invalid_regex(rule.value_match_regex.as_str(), e))?;
            list.push(ErrorTypeRule {
                value_regex,
                error_type: rule.error_type.clone(),
            });
        }
        compiled.insert(attr_name.clone(), list);
    }
    Ok(compiled)
}

/// Adds the derived attributes to spans
pub struct SpanEnricher {
    error_rules: ArcSwap<ErrorTypeRules>,
    request_context: Arc<RequestContextBuilder>,
}

impl SpanEnricher {
    /// Compile the error-type rules of `config`
    pub fn new(config: &Config, request_context: Arc<RequestContextBuilder>) -> Result<Self> {
        Ok(Self {
            error_rules: ArcSwap::from_pointee(compile_error_rules(&config.error_type_configs)?),
            request_context,
        })
    }

    /// Enrich one span of `service` in `namespace` and return its request context
    pub fn enrich_span(&self, namespace: &str, service: &str, span: &mut Span) -> String {
        if let Some(request_type) = request_type(span) {
            upsert_string_attribute(&mut span.attributes, attributes::ASSERTS_REQUEST_TYPE, request_type);
        }

        if let Some(error_type) = self.error_type(span) {
            upsert_string_attribute(&mut span.attributes, attributes::ASSERTS_ERROR_TYPE, error_type);
        }

        let request = self
            .request_context
            .get_request(span, &service_key(namespace, service));
        upsert_string_attribute(
            &mut span.attributes,
            attributes::ASSERTS_REQUEST_CONTEXT,
            request.as_str(),
        );
        request
    }

    /// Error type of the first span attribute with a matching rule
    fn error_type(&self, span: &Span) -> Option<String> {
        let rules = self.error_rules.load();
        if rules.is_empty() {
            return None;
        }

        span.attributes.iter().find_map(|kv| {
            let rules = rules.get(&kv.key)?;
            let value = kv.value.as_ref().map(any_value_string)?;
            rules
                .iter()
                .find(|rule| rule.value_regex.is_match(&value))
                .map(|rule| rule.error_type.clone())
        })
    }
}

/// `inbound` for entry spans, `outbound` for exit spans
pub fn request_type(span: &Span) -> Option<&'static str> {
    match span_role(span) {
        SpanRole::Entry => Some(REQUEST_TYPE_INBOUND),
        SpanRole::Exit => Some(REQUEST_TYPE_OUTBOUND),
        SpanRole::Internal => None,
    }
}

impl ConfigListener for SpanEnricher {
    fn name(&self) -> &'static str {
        "span-enricher"
    }

    fn is_updated(&self, current: &Config, latest: &Config) -> bool {
        current.error_type_configs != latest.error_type_configs
    }

    fn on_update(&self, latest: &Config) -> Result<()> {
        let compiled = compile_error_rules(&latest.error_type_configs)?;
        self.error_rules.store(Arc::new(compiled));
        Ok(())
    }
}
