//! Prometheus metrics for the vord daemon.
//!
//! Metrics are exposed at `GET /metrics` in Prometheus text format.
//!
//! # Metrics Exposed
//!
//! ## Request Metrics
//! - `vord_http_requests_total` - Control API requests (labels: method, path, status)
//!
//! ## Orchestration Metrics
//! - `vord_control_actions_total` - Control actions (labels: action, outcome)
//! - `vord_workers_active` - Workers currently supervised by this process
//! - `vord_cycles_total` - Completed engine cycles (labels: status)
//! - `vord_cycle_errors_total` - Cycles aborted by transport failures
//!
//! ## Provider Metrics
//! - `vord_provider_calls_total` - Upstream calls (labels: endpoint, outcome)

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initializes the metrics system.
///
/// Must be called once at startup before recording any metrics. Safe to
/// call again (tests); later calls reuse the first recorder.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    if PROMETHEUS_HANDLE.get().is_none()
        && let Ok(handle) = PrometheusBuilder::new().install_recorder()
    {
        register_metrics();
        let _ = PROMETHEUS_HANDLE.set(handle);
    }
    PROMETHEUS_HANDLE.get()
}

/// Renders current metrics in Prometheus text format.
pub fn render_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Registers all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "vord_http_requests_total",
        "Total number of control API requests"
    );
    describe_counter!("vord_control_actions_total", "Total control actions");
    describe_gauge!(
        "vord_workers_active",
        "Workers currently supervised by this process"
    );
    describe_counter!("vord_cycles_total", "Completed engine cycles by status");
    describe_counter!(
        "vord_cycle_errors_total",
        "Cycles aborted by transport failures"
    );
    describe_counter!(
        "vord_provider_calls_total",
        "Upstream provider calls by endpoint and outcome"
    );
}

/// Records a control API request.
pub fn record_http_request(method: &str, path: &str, status: u16) {
    counter!(
        "vord_http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Records one per-binding control action result.
pub fn record_control_action(action: &str, ok: bool) {
    counter!(
        "vord_control_actions_total",
        "action" => action.to_string(),
        "outcome" => if ok { "ok" } else { "failed" }
    )
    .increment(1);
}

/// Updates the supervised-worker gauge.
pub fn set_active_workers(count: usize) {
    gauge!("vord_workers_active").set(count as f64);
}

/// Records a completed engine cycle.
pub fn record_cycle(status: &str) {
    counter!(
        "vord_cycles_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Records a cycle aborted by a transport-level failure.
pub fn record_cycle_error(reason: &str) {
    counter!(
        "vord_cycle_errors_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Records one upstream provider call.
pub fn record_provider_call(endpoint: &str, outcome: &str) {
    counter!(
        "vord_provider_calls_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
