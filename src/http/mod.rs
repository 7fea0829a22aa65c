//! HTTP control API for the orchestration runtime.
//!
//! ## Endpoints
//!
//! ### Orchestration (`/v1/orchestration`)
//! - `POST /start` - Start workers with a fresh config
//! - `POST /pause` - Pause running workers (boundary-honored)
//! - `POST /resume` - Resume paused workers
//! - `POST /stop` - Cooperative stop (never retroactive mid-cycle)
//! - `POST /status` - Worker state rows for selected bindings
//! - `GET  /monitor` - Full snapshot with liveness aggregates
//! - `POST /otp` - OTP ingress for the per-binding rendezvous
//!
//! ### System
//! - `GET /health` - Health check
//! - `GET /version` - Version info
//! - `GET /metrics` - Prometheus metrics
//!
//! All control operations are idempotent; repeating a request converges on
//! the same registry state.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Request},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::constants;
use crate::metrics;
use crate::orchestrator::Orchestrator;

pub mod types;

mod handlers;

use handlers::{
    health, metrics_endpoint, monitor, pause_workers, resume_workers, start_workers, stop_workers,
    submit_otp, version, worker_status,
};
use types::ErrorResponse;

// =============================================================================
// App State
// =============================================================================

/// Shared application state for HTTP handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub default_interval_ms: u64,
    pub started_at: Instant,
}

pub(crate) type SharedState = Arc<AppState>;

// =============================================================================
// Router / Server
// =============================================================================

/// Build the control API router. Exposed separately so tests can drive it
/// without binding a socket.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/v1/orchestration/start", post(start_workers))
        .route("/v1/orchestration/pause", post(pause_workers))
        .route("/v1/orchestration/resume", post(resume_workers))
        .route("/v1/orchestration/stop", post(stop_workers))
        .route("/v1/orchestration/status", post(worker_status))
        .route("/v1/orchestration/monitor", get(monitor))
        .route("/v1/orchestration/otp", post(submit_otp))
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .layer(DefaultBodyLimit::max(constants::MAX_BODY_SIZE_BYTES))
        .layer(middleware::from_fn(metrics_middleware))
}

/// Serve the control API until a shutdown signal arrives, then drain local
/// workers.
pub async fn serve(orchestrator: Arc<Orchestrator>, port: u16, default_interval_ms: u64) -> Result<()> {
    let state = Arc::new(AppState {
        orchestrator: Arc::clone(&orchestrator),
        default_interval_ms,
        started_at: Instant::now(),
    });
    let app = router(state);

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

    tracing::info!("starting vord control API on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    orchestrator.shutdown().await;
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received, draining workers...");
}

/// Records request metrics for every control API call.
async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    metrics::record_http_request(&method, &path, response.status().as_u16());
    response
}

// =============================================================================
// Error Handling
// =============================================================================

/// Application error types for HTTP responses.
pub(crate) enum AppError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
