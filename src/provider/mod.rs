//! Typed client for the upstream voucher provider.
//!
//! Exposes one operation per upstream endpoint the engine needs:
//! `get_balance`, `start_transaction`, `check_status`, `submit_otp`.
//! Transport failures are retried with exponential backoff inside the
//! client; application-level outcomes come back as data. Every call runs
//! under the shared [`CallGate`]: global and per-server concurrency caps,
//! plus a per-server outage hold that sheds load from a dead server with an
//! escalating lockout.
//!
//! Calls honor their deadline but are never aborted by a user stop; the
//! provider is the source of truth and partial purchases must stay
//! auditable.

mod client;
mod error;
mod types;

pub use client::{CallGate, CallPermits, HoldPolicy, ProviderClient};
pub use error::{ProviderError, Result, ServerHold};
pub use types::{IS_SUCCESS_SETTLED, OtpReceipt, ServerEndpoint, StartReceipt, StatusReport};
