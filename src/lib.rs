// =============================================================================
// Lint Configuration
// =============================================================================

// Safety: no unsafe anywhere in this crate
#![forbid(unsafe_code)]
// Correctness: must handle all fallible operations
#![deny(unused_must_use)]
// Quality: pedantic but pragmatic
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![warn(unreachable_pub)]
// Allowed with documented reasons
#![allow(clippy::missing_errors_doc)] // Error returns self-documenting via type
#![allow(clippy::module_name_repetitions)] // e.g., registry::RegistryError is clearer
#![allow(clippy::must_use_candidate)] // Not all returned values need annotation
#![allow(clippy::doc_markdown)] // Too many false positives in code docs
#![allow(clippy::cast_possible_truncation)] // Intentional in millisecond conversions
#![allow(clippy::cast_sign_loss)] // Intentional in duration calculations

//! vord - voucher transaction orchestration daemon.
//!
//! One worker task per binding drives a cyclic purchase/status/OTP state
//! machine against an upstream provider. Workers coordinate through a durable
//! registry (single-holder TTL locks, CAS-guarded state, heartbeats, command
//! queues) so that multiple daemon replicas agree on worker identity,
//! liveness, and control intent.
//!
//! Module map:
//!
//! - [`registry`] - durable worker state, locks, heartbeats, commands
//! - [`provider`] - typed HTTP client for one upstream endpoint, with
//!   concurrency gates and the per-server outage hold
//! - [`engine`] - one transaction cycle (pure over provider + audit port)
//! - [`worker`] - per-binding loop with stop-at-boundary discipline
//! - [`orchestrator`] - spawning, supervision, and the control operations
//! - [`http`] - axum control API (`/v1/orchestration/*`)
//! - [`audit`] - persistence port for transaction records
//! - [`otp`] - per-binding one-time-password rendezvous

pub mod audit;
pub mod config;
pub mod constants;
pub mod engine;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod otp;
pub mod provider;
pub mod registry;
pub mod worker;
