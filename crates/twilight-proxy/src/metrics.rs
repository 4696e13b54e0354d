//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics: Prometheus text format
//!   GET /healthz: liveness probe (always 200 while the process runs)

use std::sync::Arc;

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use tokio_util::sync::CancellationToken;

type Labels = Vec<(String, String)>;

/// Counters recorded by the proxy handlers
#[derive(Clone, Default)]
pub struct ProxyMetrics {
    requests: Family<Labels, Counter>,
    decrypted_bytes: Counter,
    handshakes: Family<Labels, Counter>,
}

impl ProxyMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();

        registry.register(
            "twilight_proxy_requests",
            "Proxy requests by route and outcome",
            metrics.requests.clone(),
        );
        registry.register(
            "twilight_proxy_decrypted_bytes",
            "Plaintext bytes streamed to clients",
            metrics.decrypted_bytes.clone(),
        );
        registry.register(
            "twilight_proxy_handshakes",
            "Key handshake messages by kind",
            metrics.handshakes.clone(),
        );

        metrics
    }

    pub fn record_request(&self, route: &str, outcome: &str) {
        self.requests
            .get_or_create(&vec![
                ("route".to_string(), route.to_string()),
                ("outcome".to_string(), outcome.to_string()),
            ])
            .inc();
    }

    pub fn record_handshake(&self, kind: &str) {
        self.handshakes
            .get_or_create(&vec![("kind".to_string(), kind.to_string())])
            .inc();
    }

    /// Handle for counting plaintext bytes as they leave the decrypt stream
    pub fn decrypted_bytes(&self) -> Counter {
        self.decrypted_bytes.clone()
    }
}

/// Serve Prometheus metrics and health endpoints on `addr` until `shutdown` fires.
pub async fn serve(addr: String, registry: Arc<Registry>, shutdown: CancellationToken) -> Result<()> {
    let app = router(registry);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(registry)
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
