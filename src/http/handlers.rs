//! Handlers for the orchestration control API.

use axum::{Json, extract::State, http::StatusCode};

use super::types::{
    ControlRequest, ControlResponse, HealthResponse, MonitorResponse, OtpRequest, OtpResponse,
    StartRequest, StatusItem, StatusResponse, VersionResponse, format_duration,
};
use super::{AppError, SharedState};
use crate::registry::{BindingId, WorkerConfig};

fn binding_ids(raw: &[u64]) -> Result<Vec<BindingId>, AppError> {
    if raw.is_empty() {
        return Err(AppError::BadRequest(
            "binding_ids must not be empty".to_string(),
        ));
    }
    Ok(raw.iter().copied().map(BindingId).collect())
}

/// POST /v1/orchestration/start - start workers with a fresh config.
pub(crate) async fn start_workers(
    State(state): State<SharedState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<ControlResponse>, AppError> {
    let ids = binding_ids(&request.binding_ids)?;
    let config = WorkerConfig {
        interval_ms: request
            .interval_ms
            .unwrap_or(state.default_interval_ms),
        max_retry_status: request.max_retry_status,
        cooldown_on_error_ms: request.cooldown_on_error_ms,
        product_id: request.product_id,
        email: request.email,
        limit_harga: request.limit_harga,
    };
    config
        .validate()
        .map_err(|err| AppError::BadRequest(err.to_string()))?;

    let items = state.orchestrator.start(&ids, config).await;
    Ok(Json(ControlResponse::new("start", items)))
}

/// POST /v1/orchestration/pause - pause running workers.
pub(crate) async fn pause_workers(
    State(state): State<SharedState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, AppError> {
    let ids = binding_ids(&request.binding_ids)?;
    let items = state
        .orchestrator
        .pause(&ids, request.reason.as_deref())
        .await;
    Ok(Json(ControlResponse::new("pause", items)))
}

/// POST /v1/orchestration/resume - resume paused workers.
pub(crate) async fn resume_workers(
    State(state): State<SharedState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, AppError> {
    let ids = binding_ids(&request.binding_ids)?;
    let items = state.orchestrator.resume(&ids).await;
    Ok(Json(ControlResponse::new("resume", items)))
}

/// POST /v1/orchestration/stop - request cooperative stop.
pub(crate) async fn stop_workers(
    State(state): State<SharedState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, AppError> {
    let ids = binding_ids(&request.binding_ids)?;
    let items = state
        .orchestrator
        .stop(&ids, request.reason.as_deref())
        .await;
    Ok(Json(ControlResponse::new("stop", items)))
}

/// POST /v1/orchestration/status - worker state rows for selected bindings.
pub(crate) async fn worker_status(
    State(state): State<SharedState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    let ids = binding_ids(&request.binding_ids)?;
    let items = state.orchestrator.status(&ids).await?;
    Ok(Json(StatusResponse {
        items: items.into_iter().map(StatusItem::from).collect(),
    }))
}

/// GET /v1/orchestration/monitor - full snapshot with liveness aggregates.
pub(crate) async fn monitor(
    State(state): State<SharedState>,
) -> Result<Json<MonitorResponse>, AppError> {
    let snapshot = state.orchestrator.monitor().await?;
    Ok(Json(MonitorResponse::from(snapshot)))
}

/// POST /v1/orchestration/otp - hand a user-supplied OTP to its worker.
pub(crate) async fn submit_otp(
    State(state): State<SharedState>,
    Json(request): Json<OtpRequest>,
) -> Result<Json<OtpResponse>, AppError> {
    if request.otp.is_empty() {
        return Err(AppError::BadRequest("otp must not be empty".to_string()));
    }
    let outcome = state
        .orchestrator
        .submit_otp(BindingId(request.binding_id), request.otp);
    Ok(Json(OtpResponse {
        accepted: outcome.reason().is_none(),
        reason: outcome.reason().map(str::to_string),
    }))
}

/// GET /health - liveness probe.
pub(crate) async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime: format_duration(state.started_at.elapsed()),
    })
}

/// GET /version - build info.
pub(crate) async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /metrics - Prometheus text format.
pub(crate) async fn metrics_endpoint() -> (StatusCode, String) {
    (StatusCode::OK, crate::metrics::render_metrics())
}
