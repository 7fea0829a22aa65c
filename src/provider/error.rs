//! Provider client error types.
//!
//! Application-level outcomes (declined transactions, non-2 status codes)
//! are data and travel in the parsed response types; this error covers the
//! call mechanics only.

use std::time::Duration;

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// A server sitting out an outage hold: repeated transport failures put it
/// on hold, and calls fail fast until the hold lapses.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "server '{server}' on hold for {}ms after {failures} consecutive transport failures",
    .retry_in.as_millis()
)]
pub struct ServerHold {
    pub server: String,
    pub failures: u32,
    pub retry_in: Duration,
}

/// Errors surfaced by the provider client.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// Connect failure, timeout, or 5xx after the retry budget is spent.
    #[error("transport failure on {endpoint}: {reason}")]
    Transport {
        endpoint: &'static str,
        reason: String,
    },

    /// The provider answered with a client-error status; never retried.
    #[error("provider rejected {endpoint} with HTTP {status}")]
    Rejected {
        endpoint: &'static str,
        status: u16,
    },

    /// The body could not be decoded as the expected envelope.
    #[error("invalid response on {endpoint}: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },

    /// The server is on an outage hold; no call was issued.
    #[error(transparent)]
    OnHold(#[from] ServerHold),
}

impl ProviderError {
    /// Short machine-readable reason code for heartbeats and audit records.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Rejected { .. } => "rejected",
            Self::Decode { .. } => "decode",
            Self::OnHold(_) => "on_hold",
        }
    }

    /// True for failures the worker should treat as cycle-level (cooldown,
    /// then try again next iteration).
    pub fn is_cycle_level(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::OnHold(_) | Self::Decode { .. }
        )
    }
}
