//! Type definitions for the worker registry.
//!
//! Contains the durable records stored per binding: worker state, loop
//! configuration, the single-holder lock, heartbeats, and queued commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants;

/// Opaque stable identifier of a binding (one credential paired with one
/// upstream server). Partition key for all registry records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BindingId(pub u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BindingId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Runtime state of a binding worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Persisted worker state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStateRecord {
    pub binding_id: BindingId,
    pub state: WorkerState,
    /// Short machine-readable tag explaining the current state.
    pub reason: Option<String>,
    /// Process identity of the holding worker; `None` when idle/stopped.
    pub owner: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters of one worker run.
///
/// Written by the control plane on `start` and re-read by the worker each
/// iteration, so a later `start` takes effect on the next cycle boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Gap between iterations (milliseconds).
    pub interval_ms: u64,
    /// Bounded status re-polls per cycle.
    pub max_retry_status: u32,
    /// Wait after a cycle-level error before the next iteration.
    pub cooldown_on_error_ms: u64,
    /// Product to purchase each cycle.
    pub product_id: String,
    /// Delivery email passed to the provider.
    pub email: String,
    /// Minimum acceptable pre-transaction balance.
    pub limit_harga: i64,
}

/// Violations found while validating a [`WorkerConfig`].
#[derive(Debug, thiserror::Error)]
#[error("invalid worker config: {0}")]
pub struct InvalidWorkerConfig(pub String);

impl WorkerConfig {
    /// Validate field ranges.
    ///
    /// Collects every violation so an operator can fix a bad start request
    /// in one round trip.
    pub fn validate(&self) -> Result<(), InvalidWorkerConfig> {
        let mut problems = Vec::new();

        if !(constants::MIN_WORKER_INTERVAL_MS..=constants::MAX_WORKER_INTERVAL_MS)
            .contains(&self.interval_ms)
        {
            problems.push(format!(
                "interval_ms must be {}..={}, got {}",
                constants::MIN_WORKER_INTERVAL_MS,
                constants::MAX_WORKER_INTERVAL_MS,
                self.interval_ms
            ));
        }
        if self.max_retry_status > constants::MAX_STATUS_RETRIES {
            problems.push(format!(
                "max_retry_status must be 0..={}, got {}",
                constants::MAX_STATUS_RETRIES,
                self.max_retry_status
            ));
        }
        if self.cooldown_on_error_ms > constants::MAX_COOLDOWN_ON_ERROR_MS {
            problems.push(format!(
                "cooldown_on_error_ms must be 0..={}, got {}",
                constants::MAX_COOLDOWN_ON_ERROR_MS,
                self.cooldown_on_error_ms
            ));
        }
        if self.product_id.is_empty() {
            problems.push("product_id must not be empty".to_string());
        }
        if self.email.is_empty() {
            problems.push("email must not be empty".to_string());
        }
        if self.limit_harga <= 0 {
            problems.push(format!(
                "limit_harga must be positive, got {}",
                self.limit_harga
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(InvalidWorkerConfig(problems.join("; ")))
        }
    }
}

/// Single-holder lock record with wall-clock expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner: String,
    /// Expiry as Unix epoch milliseconds.
    pub expires_at_ms: u64,
}

impl LockRecord {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Worker heartbeat payload. `cycle` is strictly monotonic per owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub owner: String,
    pub cycle: u64,
    pub last_action: String,
    pub updated_at: DateTime<Utc>,
}

/// Control intent delivered to a binding worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandKind {
    Start,
    Pause { reason: Option<String> },
    Resume,
    Stop { reason: Option<String> },
}

/// A queued command. `seq` is monotonically increasing per binding so
/// at-least-once redelivery is detectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub seq: u64,
    #[serde(flatten)]
    pub kind: CommandKind,
    pub issued_at: DateTime<Utc>,
}

/// Durable command queue for one binding. `next_seq` survives drains so
/// sequence numbers never repeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct CommandQueue {
    pub next_seq: u64,
    pub items: Vec<Command>,
}

/// One entry of a full registry snapshot. Consistent per entry, not globally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub binding_id: BindingId,
    pub state: WorkerStateRecord,
    pub lock: Option<LockRecord>,
    pub heartbeat: Option<WorkerHeartbeat>,
}
