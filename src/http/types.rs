//! Request and response types for the control API.

use serde::{Deserialize, Serialize};

use crate::orchestrator::{ActionItem, MonitorItem, MonitorSnapshot};
use crate::registry::WorkerState;

// =============================================================================
// Control Types
// =============================================================================

/// Request to start worker loops for selected bindings.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub binding_ids: Vec<u64>,
    pub product_id: String,
    pub email: String,
    pub limit_harga: i64,
    /// Defaults to the daemon's configured interval when omitted.
    pub interval_ms: Option<u64>,
    #[serde(default = "default_max_retry_status")]
    pub max_retry_status: u32,
    #[serde(default = "default_cooldown_on_error_ms")]
    pub cooldown_on_error_ms: u64,
}

const fn default_max_retry_status() -> u32 {
    2
}

const fn default_cooldown_on_error_ms() -> u64 {
    1500
}

/// Pause/resume/stop/status request over selected bindings.
#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub binding_ids: Vec<u64>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Per-binding control action result.
#[derive(Debug, Serialize, Deserialize)]
pub struct ItemResult {
    pub binding_id: u64,
    pub ok: bool,
    pub message: String,
}

impl From<ActionItem> for ItemResult {
    fn from(item: ActionItem) -> Self {
        Self {
            binding_id: item.binding_id.0,
            ok: item.ok,
            message: item.message,
        }
    }
}

/// Control action envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub action: String,
    pub items: Vec<ItemResult>,
}

impl ControlResponse {
    pub fn new(action: &str, items: Vec<ActionItem>) -> Self {
        Self {
            action: action.to_string(),
            items: items.into_iter().map(ItemResult::from).collect(),
        }
    }
}

// =============================================================================
// Status / Monitor Types
// =============================================================================

/// One worker status row.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusItem {
    pub binding_id: u64,
    pub state: WorkerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Response for the status query.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub items: Vec<StatusItem>,
}

impl From<MonitorItem> for StatusItem {
    fn from(item: MonitorItem) -> Self {
        Self {
            binding_id: item.binding_id.0,
            state: item.state,
            reason: item.reason,
            owner: item.lock_owner,
            updated_at: (!item.state_updated_at.is_empty()).then_some(item.state_updated_at),
        }
    }
}

/// One monitor row: state joined with lock and heartbeat liveness.
#[derive(Debug, Serialize, Deserialize)]
pub struct MonitorItemDto {
    pub binding_id: u64,
    pub state: WorkerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub state_updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_cycle: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_last_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_age_ms: Option<u64>,
}

impl From<MonitorItem> for MonitorItemDto {
    fn from(item: MonitorItem) -> Self {
        Self {
            binding_id: item.binding_id.0,
            state: item.state,
            reason: item.reason,
            state_updated_at: item.state_updated_at,
            lock_owner: item.lock_owner,
            heartbeat_owner: item.heartbeat_owner,
            heartbeat_cycle: item.heartbeat_cycle,
            heartbeat_last_action: item.heartbeat_last_action,
            heartbeat_age_ms: item.heartbeat_age_ms,
        }
    }
}

/// Monitor payload with liveness aggregates.
#[derive(Debug, Serialize, Deserialize)]
pub struct MonitorResponse {
    pub total_workers: usize,
    pub active_workers: usize,
    pub items: Vec<MonitorItemDto>,
}

impl From<MonitorSnapshot> for MonitorResponse {
    fn from(snapshot: MonitorSnapshot) -> Self {
        Self {
            total_workers: snapshot.total_workers,
            active_workers: snapshot.active_workers,
            items: snapshot
                .items
                .into_iter()
                .map(MonitorItemDto::from)
                .collect(),
        }
    }
}

// =============================================================================
// OTP Ingress
// =============================================================================

/// User-supplied OTP for a waiting worker.
#[derive(Debug, Deserialize)]
pub struct OtpRequest {
    pub binding_id: u64,
    pub otp: String,
}

/// Whether the OTP was handed to a waiting worker.
#[derive(Debug, Serialize, Deserialize)]
pub struct OtpResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// =============================================================================
// System Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime: String,
}

/// Version response.
#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Format a duration as a human-readable string.
pub fn format_duration(duration: std::time::Duration) -> String {
    let total_secs = duration.as_secs();
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if days > 0 {
        format!("{days}d {hours}h {mins}m")
    } else if hours > 0 {
        format!("{hours}h {mins}m {secs}s")
    } else if mins > 0 {
        format!("{mins}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m 5s");
        assert_eq!(format_duration(Duration::from_secs(90_065)), "1d 1h 1m");
    }

    #[test]
    fn test_start_request_defaults() {
        let request: StartRequest = serde_json::from_str(
            r#"{"binding_ids":[1],"product_id":"650","email":"a@b.c","limit_harga":100000}"#,
        )
        .unwrap();
        assert!(request.interval_ms.is_none());
        assert_eq!(request.max_retry_status, 2);
        assert_eq!(request.cooldown_on_error_ms, 1500);
    }
}
