use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness check response.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// Shared readiness state.
#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Create a new health state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the service as ready.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Serves `/metrics`, `/health`, and `/ready` on `addr`.
///
/// # Errors
///
/// Returns an error if binding the HTTP listener or installing the
/// Prometheus recorder fails.
pub async fn start_metrics_server(addr: SocketAddr, health_state: HealthState) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(move || ready_handler(health_state.clone())));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

async fn ready_handler(state: HealthState) -> (StatusCode, Json<ReadyResponse>) {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not ready",
                ready: false,
            }),
        )
    }
}

/// Peer count gauges.
pub mod gauges {
    /// Increment the active peers gauge.
    pub fn inc_peers_active() {
        metrics::gauge!("goro_peers_active").increment(1.0);
    }

    /// Decrement the active peers gauge.
    pub fn dec_peers_active() {
        metrics::gauge!("goro_peers_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Record an authentication attempt with the given outcome label.
    pub fn auth_total(outcome: &'static str) {
        metrics::counter!("goro_auth_total", "outcome" => outcome).increment(1);
    }

    /// Increment the routed-messages counter.
    pub fn messages_routed_total() {
        metrics::counter!("goro_messages_routed_total").increment(1);
    }

    /// Increment the dropped-messages counter with the given reason label.
    pub fn messages_dropped_total(reason: &'static str) {
        metrics::counter!("goro_messages_dropped_total", "reason" => reason).increment(1);
    }

    /// Increment the admission-rejected counter.
    pub fn connections_rejected_total() {
        metrics::counter!("goro_connections_rejected_total").increment(1);
    }
}
