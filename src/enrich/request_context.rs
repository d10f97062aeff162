//! Request-context derivation.
//!
//! A request context is the canonical name of the endpoint a span belongs to,
//! e.g. `/api/orders` for `GET https://shop/api/orders/42?x=1`. Rules are
//! configured per service key (`namespace#service` or `service`) with a
//! `default` list as fallback; the first rule whose span kind matches and
//! whose attribute is present and matches the regex rewrites the attribute
//! value through the replacement template. Spans no rule matches use their
//! name.

use crate::control::ConfigListener;
use crate::core::otel::{attribute_string, span_kind_name};
use crate::core::{Config, MatcherDto, ProcessorError, Result};
use arc_swap::ArcSwap;
use opentelemetry_proto::tonic::trace::v1::Span;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Rule list used when a service has no rules of its own
pub const DEFAULT_RULES_KEY: &str = "default";

const DEFAULT_REPLACEMENT: &str = "$1";

/// A compiled request-context rule
#[derive(Debug, Clone)]
pub struct Matcher {
    attr_name: String,
    span_kind: String,
    regex: Regex,
    replacement: String,
}

impl Matcher {
    /// Compile a configured rule
    pub fn compile(dto: &MatcherDto) -> Result<Self> {
        let regex =
            Regex::new(&dto.regexp).map_err(|e| ProcessorError::invalid_regex(dto.regexp.as_str(), e))?;
        let replacement = if dto.replacement.is_empty() {
            DEFAULT_REPLACEMENT.to_string()
        } else {
            dto.replacement.clone()
        };
        Ok(Self {
            attr_name: dto.attr_name.clone(),
            span_kind: dto.span_kind.clone(),
            regex,
            replacement,
        })
    }

    /// Rewritten attribute value when the rule applies to `span`
    fn apply(&self, span: &Span) -> Option<String> {
        if span_kind_name(span) != self.span_kind {
            return None;
        }
        let value = attribute_string(&span.attributes, &self.attr_name)?;
        if !self.regex.is_match(&value) {
            return None;
        }
        Some(self.regex.replace_all(&value, self.replacement.as_str()).into_owned())
    }
}

type CompiledRules = HashMap<String, Vec<Matcher>>;

/// Compile every rule list; fails on the first invalid regex
fn compile_rules(config: &HashMap<String, Vec<MatcherDto>>) -> Result<CompiledRules> {
    config
        .iter()
        .map(|(key, dtos)| {
            let matchers = dtos.iter().map(Matcher::compile).collect::<Result<Vec<_>>>()?;
            Ok((key.clone(), matchers))
        })
        .collect()
}

/// Derives request contexts from spans
pub struct RequestContextBuilder {
    rules: ArcSwap<CompiledRules>,
}

impl RequestContextBuilder {
    /// Compile the rules of `config`
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            rules: ArcSwap::from_pointee(compile_rules(&config.request_context_regex)?),
        })
    }

    /// Request context of `span` using the rules of `service_key`
    pub fn get_request(&self, span: &Span, service_key: &str) -> String {
        let rules = self.rules.load();
        let matchers = rules
            .get(service_key)
            .or_else(|| rules.get(DEFAULT_RULES_KEY));

        matchers
            .and_then(|matchers| matchers.iter().find_map(|m| m.apply(span)))
            .unwrap_or_else(|| span.name.clone())
    }
}

impl ConfigListener for RequestContextBuilder {
    fn name(&self) -> &'static str {
        "request-context-builder"
    }

    fn is_updated(&self, current: &Config, latest: &Config) -> bool {
        current.request_context_regex != latest.request_context_regex
    }

    fn on_update(&self, latest: &Config) -> Result<()> {
        let compiled = compile_rules(&latest.request_context_regex)?;
        self.rules.store(Arc::new(compiled));
        Ok(())
    }
}
