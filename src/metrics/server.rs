//! Prometheus scrape endpoint.

use crate::core::{ProcessorError, Result};
use crate::metrics::MetricHelper;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Router serving `GET /metrics`
pub fn router(metrics: Arc<MetricHelper>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

/// Bind the scrape endpoint on all interfaces
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = format!("0.0.0.0:{}", port);
    TcpListener::bind(&addr)
        .await
        .map_err(|e| ProcessorError::network(format!("Failed to bind metrics endpoint {}: {}", addr, e)))
}

/// Serve `/metrics` on `listener` until the stop signal fires
pub async fn serve(
    metrics: Arc<MetricHelper>,
    listener: TcpListener,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Serving Prometheus metrics on http://{}/metrics", addr);
    }

    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move {
            let _ = stop.changed().await;
        })
        .await
        .map_err(|e| ProcessorError::network(format!("Metrics endpoint error: {}", e)))
}

/// GET /metrics - text exposition format
async fn metrics_handler(State(metrics): State<Arc<MetricHelper>>) -> Response {
    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    if let Err(e) = encoder.encode(&metrics.registry().gather(), &mut body) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], body).into_response()
}
