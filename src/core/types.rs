use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Entity type used for every service-level entity key
pub const SERVICE_ENTITY_TYPE: &str = "Service";

/// Scope key carrying the environment label
pub const SCOPE_ENV: &str = "env";
/// Scope key carrying the deployment-site label
pub const SCOPE_SITE: &str = "site";
/// Scope key carrying the service namespace
pub const SCOPE_NAMESPACE: &str = "namespace";

/// Identifies a service within an environment.
///
/// The scope is kept in a sorted map so that the canonical string form does
/// not depend on insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity type, always [`SERVICE_ENTITY_TYPE`] for keys built by the processor
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Service name
    pub name: String,
    /// Environment, site and namespace labels
    pub scope: BTreeMap<String, String>,
}

impl EntityKey {
    /// Build the key of a service observed in `namespace`
    pub fn service(env: &str, site: &str, namespace: &str, service: &str) -> Self {
        let mut scope = BTreeMap::new();
        scope.insert(SCOPE_ENV.to_string(), env.to_string());
        scope.insert(SCOPE_SITE.to_string(), site.to_string());
        scope.insert(SCOPE_NAMESPACE.to_string(), namespace.to_string());
        EntityKey {
            entity_type: SERVICE_ENTITY_TYPE.to_string(),
            name: service.to_string(),
            scope,
        }
    }

    /// Canonical string form: `{k1=v1, k2=v2}/type/name`
    pub fn as_string(&self) -> String {
        let scope = self
            .scope
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{}}}/{}/{}", scope, self.entity_type, self.name)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// A (service, request) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    /// Owning service
    pub entity_key: EntityKey,
    /// Request context
    pub request: String,
}

impl RequestKey {
    /// Create a new request key
    pub fn new(entity_key: EntityKey, request: impl Into<String>) -> Self {
        RequestKey {
            entity_key,
            request: request.into(),
        }
    }

    /// Canonical string form: `<entity>#<request>`
    pub fn as_string(&self) -> String {
        format!("{}#{}", self.entity_key.as_string(), self.request)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// Latency upper bound for one request of a service, as served by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEntry {
    /// Request type the bound was computed for
    #[serde(default)]
    pub request_type: String,
    /// Request context; empty for the service-wide default
    #[serde(default)]
    pub request_context: String,
    /// Upper latency bound
    #[serde(rename = "upper_threshold")]
    pub upper_bound_seconds: f64,
}

/// Map key for per-service state: `namespace#service`, or `service` without a namespace
pub fn service_key(namespace: &str, service: &str) -> String {
    if namespace.is_empty() {
        service.to_string()
    } else {
        format!("{}#{}", namespace, service)
    }
}
