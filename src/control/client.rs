//! HTTP client for the control plane.
//!
//! Two calls are made: `GET {endpoint}/v1/config` returning the processor
//! configuration, and `POST {endpoint}/v1/latency-thresholds` with an entity
//! key body returning the latency upper bounds of that service. Requests
//! carry JSON headers and HTTP basic auth when credentials are configured.
//! There are no retries; callers keep their previous state on failure.

use crate::core::{AssertsServer, Config, EntityKey, ProcessorError, Result, ThresholdEntry};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Path serving the processor configuration
pub const CONFIG_PATH: &str = "/v1/config";
/// Path serving per-request latency thresholds
pub const THRESHOLDS_PATH: &str = "/v1/latency-thresholds";
/// Timeout applied to every control-plane request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Reusable control-plane client
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl ControlPlaneClient {
    /// Build a client for the configured server
    pub fn new(server: &AssertsServer) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let credentials = match (&server.user, &server.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };

        Ok(Self {
            client,
            base_url: server.endpoint.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Fetch the full configuration
    pub async fn fetch_config(&self) -> Result<Config> {
        let request = self.request(Method::GET, CONFIG_PATH);
        self.send(request, CONFIG_PATH).await
    }

    /// Fetch the latency thresholds of one service
    pub async fn fetch_thresholds(&self, entity_key: &EntityKey) -> Result<Vec<ThresholdEntry>> {
        let request = self.request(Method::POST, THRESHOLDS_PATH).json(entity_key);
        self.send(request, THRESHOLDS_PATH).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, path: &str) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ProcessorError::RemoteStatus {
                status: status.as_u16(),
                url: format!("{}{}", self.base_url, path),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| ProcessorError::decode(format!("{} response: {}", path, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{basic_auth, body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn server(endpoint: &str, with_auth: bool) -> AssertsServer {
        AssertsServer {
            endpoint: endpoint.to_string(),
            user: with_auth.then(|| "processor".to_string()),
            password: with_auth.then(|| "secret".to_string()),
        }
    }

    #[tokio::test]
    async fn test_fetch_config_with_basic_auth() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/config"))
            .and(basic_auth("processor", "secret"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "asserts_env": "prod",
                "limit_per_service": 42
            })))
            .expect(1)
            .mount(&mock)
            .await;

        let client = ControlPlaneClient::new(&server(&mock.uri(), true)).unwrap();
        let config = client.fetch_config().await.unwrap();
        assert_eq!(config.asserts_env, "prod");
        assert_eq!(config.limit_per_service, 42);
    }

    #[tokio::test]
    async fn test_fetch_thresholds_posts_entity_key() {
        let mock = MockServer::start().await;
        let entity = EntityKey::service("dev", "us-west-2", "shop", "cart");
        Mock::given(method("POST"))
            .and(path("/v1/latency-thresholds"))
            .and(body_json(&entity))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"request_context": "/checkout", "upper_threshold": 0.8},
                {"request_context": "", "upper_threshold": 2.0}
            ])))
            .mount(&mock)
            .await;

        let client = ControlPlaneClient::new(&server(&format!("{}/", mock.uri()), false)).unwrap();
        let thresholds = client.fetch_thresholds(&entity).await.unwrap();
        assert_eq!(thresholds.len(), 2);
        assert_eq!(thresholds[0].request_context, "/checkout");
        assert_eq!(thresholds[1].upper_bound_seconds, 2.0);
    }

    #[tokio::test]
    async fn test_non_200_is_an_error() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/config"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock)
            .await;

        let client = ControlPlaneClient::new(&server(&mock.uri(), false)).unwrap();
        let err = client.fetch_config().await.unwrap_err();
        assert!(matches!(err, ProcessorError::RemoteStatus { status: 503, .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/config"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock)
            .await;

        let client = ControlPlaneClient::new(&server(&mock.uri(), false)).unwrap();
        assert!(matches!(client.fetch_config().await, Err(ProcessorError::Decode(_))));
    }
}
