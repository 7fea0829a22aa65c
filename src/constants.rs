//! Centralized constants for orchestration limits and defaults.
//!
//! All magic numbers in the daemon should be defined here with documented
//! rationale. This enables consistent limits across modules and easy tuning
//! without a code search.

// =============================================================================
// Worker Loop Defaults
// =============================================================================

/// Default gap between worker iterations (milliseconds).
/// Rationale: fast enough to keep a binding busy, slow enough to not hammer
/// the provider when cycles are short.
pub const DEFAULT_WORKER_INTERVAL_MS: u64 = 800;

/// Lower bound for the per-worker iteration interval.
pub const MIN_WORKER_INTERVAL_MS: u64 = 100;

/// Upper bound for the per-worker iteration interval.
pub const MAX_WORKER_INTERVAL_MS: u64 = 10_000;

/// Maximum bounded status re-polls inside one cycle.
pub const MAX_STATUS_RETRIES: u32 = 10;

/// Upper bound for the post-error cooldown inside the worker loop.
pub const MAX_COOLDOWN_ON_ERROR_MS: u64 = 30_000;

/// Sleep between state re-reads while a worker is paused (milliseconds).
/// Rationale: pause latency is operator-facing; half a second is prompt
/// without busy-reading the registry.
pub const PAUSED_POLL_MS: u64 = 500;

/// Fixed delay between short-retry status polls inside a cycle (milliseconds).
pub const STATUS_RETRY_DELAY_MS: u64 = 1_000;

// =============================================================================
// Registry Defaults
// =============================================================================

/// Default lock TTL (milliseconds). Must exceed the worst-case single
/// provider call plus refresh jitter; 15s covers a 10s call timeout.
pub const DEFAULT_LOCK_TTL_MS: u64 = 15_000;

/// Default heartbeat interval (milliseconds).
pub const DEFAULT_HEARTBEAT_MS: u64 = 3_000;

// =============================================================================
// Provider Client Defaults
// =============================================================================

/// Default global cap on concurrent provider calls across all workers.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 50;

/// Default cap on concurrent provider calls per upstream server.
/// Rationale: the upstream endpoints are session-scoped and degrade quickly
/// under parallel load from one credential pool.
pub const DEFAULT_MAX_CONCURRENT_PER_SERVER: usize = 2;

/// Default per-call timeout for provider requests (milliseconds).
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 10_000;

/// Default transport retry budget per provider call.
pub const DEFAULT_PROVIDER_RETRIES: u32 = 3;

/// Default base backoff between transport retries (milliseconds).
/// Grows exponentially per attempt.
pub const DEFAULT_PROVIDER_BACKOFF_MS: u64 = 200;

/// Ceiling for the exponential retry backoff (milliseconds).
pub const MAX_PROVIDER_BACKOFF_MS: u64 = 10_000;

// =============================================================================
// OTP Rendezvous
// =============================================================================

/// Default wait for a user-supplied OTP before failing the transaction
/// (milliseconds). Two minutes matches typical OTP validity windows.
pub const DEFAULT_OTP_TIMEOUT_MS: u64 = 120_000;

// =============================================================================
// Outage Hold Defaults
// =============================================================================

/// Consecutive transport failures before a server goes on hold.
/// Rationale: 5 consecutive failures indicates a real outage, not jitter.
pub const HOLD_FAILURE_THRESHOLD: u32 = 5;

/// First hold duration (milliseconds). Doubles with each hold served
/// without an intervening success.
pub const HOLD_BASE_MS: u64 = 5_000;

/// Ceiling for the escalating hold (milliseconds). Two minutes keeps a dead
/// server from being hammered while still noticing a recovery promptly.
pub const HOLD_MAX_MS: u64 = 120_000;

// =============================================================================
// HTTP API
// =============================================================================

/// Default control API port.
pub const DEFAULT_API_PORT: u16 = 9190;

/// Maximum request body size for the control API (1 MB).
/// Control payloads are id lists; anything larger is a client bug.
pub const MAX_BODY_SIZE_BYTES: usize = 1024 * 1024;

/// How long graceful shutdown waits for workers to reach a loop boundary
/// before giving up (milliseconds).
pub const SHUTDOWN_DRAIN_TIMEOUT_MS: u64 = 30_000;
