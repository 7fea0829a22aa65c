//! Logging setup for the vord daemon.
//!
//! The daemon knows two output modes, selected by the `--json-logs` flag:
//! human-readable output for a terminal, or one JSON object per line for
//! log shippers. Filtering follows `RUST_LOG` when set and defaults to
//! `info` otherwise.

use std::io;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Initialize the global tracing subscriber. Called once at startup.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stdout));
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(true));
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}
