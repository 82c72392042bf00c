//! The HTTP health endpoint: `GET /health` returns uptime and live counts.

use axum::{error_handling::HandleErrorLayer, extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;

/// The health document served at `/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub uptime_secs: u64,
    pub sessions: usize,
    pub channels: usize,
    pub disputes_open: usize,
    pub disputes_resolved: usize,
}

/// Implemented by the relay server; queried per request.
#[async_trait::async_trait]
pub trait HealthSource: Send + Sync {
    async fn snapshot(&self) -> HealthSnapshot;
}

async fn health_handler(State(source): State<Arc<dyn HealthSource>>) -> Json<HealthSnapshot> {
    Json(source.snapshot().await)
}

async fn handle_service_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unhandled internal error: {err}"),
        )
    }
}

/// Serves `/health` until `shutdown` resolves.
pub async fn run_health_server(
    addr: SocketAddr,
    source: Arc<dyn HealthSource>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) {
    let app = Router::new()
        .route("/health", get(health_handler))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_service_error))
                .layer(TraceLayer::new_for_http())
                .load_shed()
                .concurrency_limit(16)
                .timeout(Duration::from_secs(2)),
        )
        .with_state(source);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(target: "telemetry", error = %e, "failed to bind health server");
            return;
        }
    };
    if let Ok(local) = listener.local_addr() {
        tracing::info!(target: "telemetry", addr = %local, "health endpoint listening");
    }

    let graceful =
        axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown);
    if let Err(e) = graceful.await {
        tracing::error!(target: "telemetry", error = %e, "health server error");
    }
}
