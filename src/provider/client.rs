//! HTTP client for one upstream provider endpoint.
//!
//! One `ProviderClient` serves one binding: it carries the binding's
//! credential and the server it is bound to. Calls are admitted through the
//! shared [`CallGate`] (global + per-server concurrency caps, plus the
//! per-server outage hold), then retried on transport failures up to the
//! server's budget with exponential backoff. Application-level outcomes are
//! returned as data, never retried.
//!
//! # Outage hold
//!
//! The gate keeps failure bookkeeping next to each server's semaphore. Once
//! a server accumulates `failure_threshold` consecutive transport failures,
//! it goes on hold and every call fails fast until the hold lapses. Each
//! hold served without an intervening success doubles the next one (capped),
//! so a dead server backs the fleet off harder the longer it stays dead.
//! There is no probe state: workers are long-lived pollers and re-knock on
//! their own cadence once the hold expires, and any success wipes the slate.
//! The server set is bounded by the config directory, so slots live for the
//! life of the process with no eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::error::{ProviderError, Result, ServerHold};
use super::types::{OtpReceipt, ServerEndpoint, StartReceipt, StatusReport, parse_balance};
use crate::constants;
use crate::metrics;

/// Knobs for the outage hold.
#[derive(Debug, Clone)]
pub struct HoldPolicy {
    /// Consecutive transport failures before a server goes on hold.
    pub failure_threshold: u32,
    /// First hold duration; doubles per hold served without a success.
    pub base_hold: Duration,
    /// Ceiling for the escalation.
    pub max_hold: Duration,
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: constants::HOLD_FAILURE_THRESHOLD,
            base_hold: Duration::from_millis(constants::HOLD_BASE_MS),
            max_hold: Duration::from_millis(constants::HOLD_MAX_MS),
        }
    }
}

/// Per-server failure bookkeeping. Lives inside the server's gate slot.
#[derive(Debug, Default)]
struct ServerHealth {
    consecutive_failures: u32,
    /// Holds served since the last success; scales the next hold.
    strikes: u32,
    held_until: Option<Instant>,
}

impl ServerHealth {
    /// Remaining hold, if any. A lapsed hold is cleared, but the failure
    /// streak stays: the very next failure re-trips with a longer hold.
    fn remaining_hold(&mut self, now: Instant) -> Option<Duration> {
        match self.held_until {
            Some(until) if now < until => Some(until - now),
            Some(_) => {
                self.held_until = None;
                None
            }
            None => None,
        }
    }

    fn on_success(&mut self) {
        *self = Self::default();
    }

    /// Count one transport failure; returns the hold started, if one was.
    fn on_failure(&mut self, policy: &HoldPolicy, now: Instant) -> Option<Duration> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures < policy.failure_threshold {
            return None;
        }
        let hold = policy
            .base_hold
            .saturating_mul(1 << self.strikes.min(8))
            .min(policy.max_hold);
        self.strikes = self.strikes.saturating_add(1);
        self.held_until = Some(now + hold);
        Some(hold)
    }
}

struct ServerSlot {
    semaphore: Arc<Semaphore>,
    health: ServerHealth,
}

impl ServerSlot {
    fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            health: ServerHealth::default(),
        }
    }
}

/// Shared admission control for provider calls: one global semaphore, and
/// per server a semaphore plus outage-hold bookkeeping. Both permits are
/// held for the full duration of a call, including its transport retries.
pub struct CallGate {
    global: Arc<Semaphore>,
    per_server_limit: usize,
    hold_policy: HoldPolicy,
    per_server: Mutex<HashMap<String, ServerSlot>>,
}

/// Permits for one in-flight provider call. Dropping releases both slots.
#[derive(Debug)]
pub struct CallPermits {
    _global: OwnedSemaphorePermit,
    _server: OwnedSemaphorePermit,
}

impl CallGate {
    pub fn new(global_limit: usize, per_server_limit: usize) -> Self {
        Self::with_hold_policy(global_limit, per_server_limit, HoldPolicy::default())
    }

    pub fn with_hold_policy(
        global_limit: usize,
        per_server_limit: usize,
        hold_policy: HoldPolicy,
    ) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit)),
            per_server_limit,
            hold_policy,
            per_server: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for a call slot against `server`, failing fast while the server
    /// is on an outage hold.
    ///
    /// The per-server slot is taken first so a saturated server cannot pin
    /// global capacity while queueing.
    pub async fn admit(&self, server: &str) -> std::result::Result<CallPermits, ServerHold> {
        let server_semaphore = {
            let mut map = self.per_server.lock();
            let slot = map
                .entry(server.to_string())
                .or_insert_with(|| ServerSlot::new(self.per_server_limit));
            if let Some(retry_in) = slot.health.remaining_hold(Instant::now()) {
                return Err(ServerHold {
                    server: server.to_string(),
                    failures: slot.health.consecutive_failures,
                    retry_in,
                });
            }
            Arc::clone(&slot.semaphore)
        };

        // Neither semaphore is ever closed, so acquire cannot fail.
        let server_permit = server_semaphore
            .acquire_owned()
            .await
            .expect("per-server semaphore closed");
        let global_permit = Arc::clone(&self.global)
            .acquire_owned()
            .await
            .expect("global semaphore closed");

        Ok(CallPermits {
            _global: global_permit,
            _server: server_permit,
        })
    }

    /// Any successful call wipes the server's failure slate.
    pub fn record_success(&self, server: &str) {
        let mut map = self.per_server.lock();
        if let Some(slot) = map.get_mut(server) {
            slot.health.on_success();
        }
    }

    /// Count one exhausted-retries failure against the server.
    pub fn record_failure(&self, server: &str) {
        let mut map = self.per_server.lock();
        let slot = map
            .entry(server.to_string())
            .or_insert_with(|| ServerSlot::new(self.per_server_limit));
        if let Some(hold) = slot.health.on_failure(&self.hold_policy, Instant::now()) {
            warn!(
                server,
                failures = slot.health.consecutive_failures,
                hold_ms = hold.as_millis() as u64,
                "server put on hold after repeated transport failures"
            );
        }
    }

    #[cfg(test)]
    pub(crate) fn available_global(&self) -> usize {
        self.global.available_permits()
    }
}

/// Typed calls against one upstream server on behalf of one credential.
#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    server: ServerEndpoint,
    credential: String,
    gate: Arc<CallGate>,
}

impl ProviderClient {
    pub fn new(server: ServerEndpoint, credential: String, gate: Arc<CallGate>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(server.timeout_ms))
            .pool_max_idle_per_host(1)
            .build()
            .expect("failed to create HTTP client - check TLS configuration");

        Self {
            http,
            server,
            credential,
            gate,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server.name
    }

    /// Current credit balance for the bound credential.
    pub async fn get_balance(&self) -> Result<i64> {
        let raw = self
            .request_json("balance_pulsa", &[("username", self.credential.clone())])
            .await?;
        parse_balance(&raw).ok_or_else(|| ProviderError::Decode {
            endpoint: "balance_pulsa",
            reason: "missing res.balance".to_string(),
        })
    }

    /// Start a voucher purchase.
    pub async fn start_transaction(
        &self,
        product_id: &str,
        email: &str,
        limit_harga: i64,
    ) -> Result<StartReceipt> {
        let raw = self
            .request_json(
                "trx_idv",
                &[
                    ("username", self.credential.clone()),
                    ("product_id", product_id.to_string()),
                    ("email", email.to_string()),
                    ("limit_harga", limit_harga.to_string()),
                ],
            )
            .await?;
        Ok(StartReceipt::parse(raw))
    }

    /// Poll the status of a started transaction. Idempotent read path.
    pub async fn check_status(&self, trx_id: &str) -> Result<StatusReport> {
        let raw = self
            .request_json(
                "status_idv",
                &[
                    ("username", self.credential.clone()),
                    ("trx_id", trx_id.to_string()),
                ],
            )
            .await?;
        Ok(StatusReport::parse(raw))
    }

    /// Submit a user-supplied OTP for the in-flight transaction.
    pub async fn submit_otp(&self, otp: &str) -> Result<OtpReceipt> {
        let raw = self
            .request_json(
                "otp_idv",
                &[
                    ("username", self.credential.clone()),
                    ("otp", otp.to_string()),
                ],
            )
            .await?;
        Ok(OtpReceipt::parse(raw))
    }

    /// Issue one GET with admission control, hold accounting, and bounded
    /// transport retries.
    async fn request_json(
        &self,
        endpoint: &'static str,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let _permits = self.gate.admit(&self.server.name).await.map_err(|hold| {
            metrics::record_provider_call(endpoint, "on_hold");
            ProviderError::from(hold)
        })?;
        let url = format!("{}/{}", self.server.base_url.trim_end_matches('/'), endpoint);

        let mut attempt: u32 = 0;
        loop {
            let outcome = self.http.get(&url).query(params).send().await;

            let retryable_reason = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response.json::<Value>().await.map_err(|err| {
                            metrics::record_provider_call(endpoint, "decode_error");
                            ProviderError::Decode {
                                endpoint,
                                reason: err.to_string(),
                            }
                        })?;
                        self.gate.record_success(&self.server.name);
                        metrics::record_provider_call(endpoint, "ok");
                        debug!(server = %self.server.name, endpoint, "provider call ok");
                        return Ok(body);
                    } else if status.is_server_error() {
                        format!("HTTP {status}")
                    } else {
                        // The server answered; this is application data, and
                        // the transport is healthy.
                        self.gate.record_success(&self.server.name);
                        metrics::record_provider_call(endpoint, "rejected");
                        return Err(ProviderError::Rejected {
                            endpoint,
                            status: status.as_u16(),
                        });
                    }
                }
                Err(err) if err.is_timeout() => "timeout".to_string(),
                Err(err) => err.to_string(),
            };

            if attempt >= self.server.retries {
                self.gate.record_failure(&self.server.name);
                metrics::record_provider_call(endpoint, "transport_error");
                warn!(
                    server = %self.server.name,
                    endpoint,
                    attempts = attempt + 1,
                    reason = %retryable_reason,
                    "provider call failed after exhausting retries"
                );
                return Err(ProviderError::Transport {
                    endpoint,
                    reason: retryable_reason,
                });
            }

            let backoff = backoff_delay(self.server.backoff_ms, attempt);
            debug!(
                server = %self.server.name,
                endpoint,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                reason = %retryable_reason,
                "provider call failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

/// Exponential backoff, capped so a large retry budget cannot stall a cycle.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(16);
    Duration::from_millis(
        base_ms
            .saturating_mul(factor)
            .min(crate::constants::MAX_PROVIDER_BACKOFF_MS),
    )
}
