//! Per-binding worker loop.
//!
//! One worker drives one binding: acquire the lock, then loop
//! `{read state, refresh lock, run one engine cycle, heartbeat, drain
//! commands, sleep}` until told to stop. Stops are honored only at loop
//! boundaries; an in-flight cycle always completes so the provider-side
//! outcome is audited. Every provider call and sleep inside the loop is a
//! yield point.
//!
//! Failure policy per iteration:
//! - transport errors that exhausted the client's retries: log, cool down,
//!   next iteration; worker state unchanged
//! - lock lost: finish bookkeeping, exit without releasing
//! - registry unavailable: keep the last-known config and keep cycling
//!   (nobody can steal the lock while the registry is down); exit once the
//!   outage outlives the lock TTL

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::constants;
use crate::engine::TransactionEngine;
use crate::metrics;
use crate::registry::{
    BindingId, CommandKind, Registry, WorkerConfig, WorkerHeartbeat, WorkerState,
};

/// Why the worker left its loop. Returned for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Another process held the lock at spawn time.
    LostSpawnRace,
    /// The control plane set the state to `stopped`.
    StopRequested,
    /// The engine reported a hard-stop condition.
    StopCondition { reason: String },
    /// The lock could not be refreshed; another owner took over.
    LockLost,
    /// The registry was unreachable for longer than the lock TTL.
    RegistryOutage,
    /// No config record exists for the binding.
    MissingConfig,
}

/// A running worker's dependencies and identity.
pub struct Worker {
    binding_id: BindingId,
    owner: String,
    registry: Registry,
    engine: TransactionEngine,
    lock_ttl_ms: u64,
    heartbeat_ms: u64,
    otp_timeout_ms: u64,
    provider_timeout_ms: u64,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        binding_id: BindingId,
        owner: String,
        registry: Registry,
        engine: TransactionEngine,
        lock_ttl_ms: u64,
        heartbeat_ms: u64,
        otp_timeout_ms: u64,
        provider_timeout_ms: u64,
    ) -> Self {
        Self {
            binding_id,
            owner,
            registry,
            engine,
            lock_ttl_ms,
            heartbeat_ms,
            otp_timeout_ms,
            provider_timeout_ms,
        }
    }

    /// Run the loop to completion. Never panics out; every exit path goes
    /// through [`Self::stopping`].
    pub async fn run(self) -> WorkerExit {
        let binding_id = self.binding_id;

        match self
            .registry
            .acquire_lock_async(binding_id, self.owner.clone(), self.lock_ttl_ms)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(binding_id = %binding_id, owner = %self.owner, "lock held elsewhere, not spawning");
                return WorkerExit::LostSpawnRace;
            }
            Err(err) => {
                warn!(binding_id = %binding_id, error = %err, "registry unreachable at spawn");
                return WorkerExit::RegistryOutage;
            }
        }

        info!(binding_id = %binding_id, owner = %self.owner, "worker started");
        let exit = self.run_loop().await;
        self.stopping(&exit).await;
        info!(binding_id = %binding_id, owner = %self.owner, exit = ?exit, "worker exited");
        exit
    }

    async fn run_loop(&self) -> WorkerExit {
        let binding_id = self.binding_id;
        let mut cycle: u64 = 0;
        let mut last_config: Option<WorkerConfig> = None;
        let mut last_applied_seq: Option<u64> = None;
        let mut outage_since: Option<Instant> = None;

        loop {
            let iteration_started = Instant::now();

            // 1. Read desired state. A read failure enters the outage
            // window: keep the last-known config and treat the state as
            // running.
            let state = match self.registry.get_state_async(binding_id).await {
                Ok(record) => {
                    outage_since = None;
                    record.map(|record| record.state)
                }
                Err(err) => {
                    if self.outage_exceeded(&mut outage_since, &err) {
                        return WorkerExit::RegistryOutage;
                    }
                    Some(WorkerState::Running)
                }
            };

            match state {
                Some(WorkerState::Stopped) | None => return WorkerExit::StopRequested,
                Some(WorkerState::Paused) => {
                    // Keep ownership and liveness visible while paused; the
                    // engine never runs.
                    if let Ok(false) = self
                        .registry
                        .refresh_lock_async(binding_id, self.owner.clone(), self.lock_ttl_ms)
                        .await
                    {
                        return WorkerExit::LockLost;
                    }
                    cycle += 1;
                    self.send_heartbeat(cycle, "paused").await;
                    self.drain_and_apply(&mut last_applied_seq).await;
                    tokio::time::sleep(Duration::from_millis(
                        self.heartbeat_ms.min(constants::PAUSED_POLL_MS),
                    ))
                    .await;
                    continue;
                }
                Some(WorkerState::Running | WorkerState::Idle) => {}
            }

            // 3. Refresh the lock. `false` means another process took over;
            // exit without touching anything that is now theirs.
            match self
                .registry
                .refresh_lock_async(binding_id, self.owner.clone(), self.lock_ttl_ms)
                .await
            {
                Ok(true) => {}
                Ok(false) => return WorkerExit::LockLost,
                Err(err) => {
                    if self.outage_exceeded(&mut outage_since, &err) {
                        return WorkerExit::RegistryOutage;
                    }
                }
            }

            // Config is re-read every iteration so a restart's new config
            // takes effect at the next boundary.
            match self.registry.get_config_async(binding_id).await {
                Ok(Some(config)) => last_config = Some(config),
                Ok(None) => return WorkerExit::MissingConfig,
                Err(err) => {
                    if self.outage_exceeded(&mut outage_since, &err) {
                        return WorkerExit::RegistryOutage;
                    }
                }
            }
            let Some(config) = last_config.clone() else {
                return WorkerExit::MissingConfig;
            };

            // 4./5. Run one cycle under its deadline. Stop commands are not
            // consulted until the next boundary.
            let deadline = self.cycle_deadline(&config);
            let mut cooldown = false;
            let mut stop_reason: Option<String> = None;
            let last_action;

            match tokio::time::timeout(deadline, self.engine.run_cycle(&config)).await {
                Ok(Ok(outcome)) => {
                    let status = outcome.status;
                    if let Some(stop) = outcome.stop {
                        stop_reason = Some(stop.reason());
                        last_action = format!("stop_condition:{status}");
                    } else {
                        last_action = format!("cycle_ok:{status}");
                    }
                }
                Ok(Err(err)) => {
                    warn!(
                        binding_id = %binding_id,
                        error = %err,
                        "cycle failed, cooling down"
                    );
                    metrics::record_cycle_error(err.reason_code());
                    last_action = format!("cycle_error:{}", err.reason_code());
                    cooldown = true;
                }
                Err(_) => {
                    warn!(
                        binding_id = %binding_id,
                        deadline_ms = deadline.as_millis() as u64,
                        "cycle exceeded its deadline, cooling down"
                    );
                    metrics::record_cycle_error("deadline");
                    last_action = "cycle_error:deadline".to_string();
                    cooldown = true;
                }
            }

            // 6. A hard stop is written while we still hold the lock, then
            // honored at the top of the next iteration.
            if let Some(reason) = &stop_reason {
                match self
                    .registry
                    .set_state_async(
                        binding_id,
                        self.owner.clone(),
                        WorkerState::Stopped,
                        Some(reason.clone()),
                    )
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => return WorkerExit::LockLost,
                    Err(err) => {
                        warn!(binding_id = %binding_id, error = %err, "failed to write stop state");
                    }
                }
            }

            // 7. Heartbeat once per completed iteration.
            cycle += 1;
            self.send_heartbeat(cycle, &last_action).await;

            if let Some(reason) = stop_reason {
                return WorkerExit::StopCondition { reason };
            }

            // 8. Apply queued commands; a stop seen here is honored at the
            // next boundary via the state read.
            self.drain_and_apply(&mut last_applied_seq).await;

            // Recheck before sleeping so a stop issued mid-cycle is honored
            // at this boundary instead of one interval later.
            if let Ok(Some(record)) = self.registry.get_state_async(binding_id).await
                && record.state == WorkerState::Stopped
            {
                return WorkerExit::StopRequested;
            }

            // 9. Sleep out the remainder of the interval.
            let gap = if cooldown {
                Duration::from_millis(config.cooldown_on_error_ms)
            } else {
                Duration::from_millis(config.interval_ms)
                    .saturating_sub(iteration_started.elapsed())
            };
            tokio::time::sleep(gap).await;
        }
    }

    /// Release the lock (owner-checked) unless another owner already holds
    /// it, and leave a terminal state for exits the control plane did not
    /// initiate itself.
    async fn stopping(&self, exit: &WorkerExit) {
        match exit {
            WorkerExit::LockLost | WorkerExit::LostSpawnRace => {}
            WorkerExit::MissingConfig => {
                if let Err(err) = self
                    .registry
                    .put_state_async(
                        self.binding_id,
                        WorkerState::Stopped,
                        Some("missing_worker_config".to_string()),
                    )
                    .await
                {
                    warn!(binding_id = %self.binding_id, error = %err, "failed to write final state");
                }
                self.release().await;
            }
            WorkerExit::StopRequested
            | WorkerExit::StopCondition { .. }
            | WorkerExit::RegistryOutage => {
                self.release().await;
            }
        }
    }

    async fn release(&self) {
        match self
            .registry
            .release_lock_async(self.binding_id, self.owner.clone())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(binding_id = %self.binding_id, "lock already held elsewhere, not released");
            }
            Err(err) => {
                warn!(binding_id = %self.binding_id, error = %err, "failed to release lock");
            }
        }
    }

    async fn send_heartbeat(&self, cycle: u64, last_action: &str) {
        let heartbeat = WorkerHeartbeat {
            owner: self.owner.clone(),
            cycle,
            last_action: last_action.to_string(),
            updated_at: Utc::now(),
        };
        match self.registry.heartbeat_async(self.binding_id, heartbeat).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(binding_id = %self.binding_id, "heartbeat rejected, lock owned elsewhere");
            }
            Err(err) => {
                debug!(binding_id = %self.binding_id, error = %err, "heartbeat write failed");
            }
        }
    }

    /// Drain queued commands and apply them idempotently, skipping sequence
    /// numbers already seen (at-least-once delivery).
    async fn drain_and_apply(&self, last_applied_seq: &mut Option<u64>) {
        let commands = match self.registry.drain_commands_async(self.binding_id).await {
            Ok(commands) => commands,
            Err(err) => {
                debug!(binding_id = %self.binding_id, error = %err, "command drain failed");
                return;
            }
        };

        for command in commands {
            if last_applied_seq.is_some_and(|applied| command.seq <= applied) {
                debug!(
                    binding_id = %self.binding_id,
                    seq = command.seq,
                    "skipping redelivered command"
                );
                continue;
            }
            *last_applied_seq = Some(command.seq);

            let (state, reason) = match command.kind {
                // Already running; start is what spawned us.
                CommandKind::Start => continue,
                CommandKind::Pause { reason } => (
                    WorkerState::Paused,
                    reason.or_else(|| Some("manual_pause".to_string())),
                ),
                CommandKind::Resume => (WorkerState::Running, None),
                CommandKind::Stop { reason } => (
                    WorkerState::Stopped,
                    reason.or_else(|| Some("manual_stop".to_string())),
                ),
            };

            match self
                .registry
                .set_state_async(self.binding_id, self.owner.clone(), state, reason)
                .await
            {
                Ok(true) => {
                    debug!(binding_id = %self.binding_id, state = %state, seq = command.seq, "applied command");
                }
                Ok(false) => {
                    debug!(binding_id = %self.binding_id, seq = command.seq, "command ignored, lock owned elsewhere");
                }
                Err(err) => {
                    debug!(binding_id = %self.binding_id, error = %err, "command apply failed");
                }
            }
        }
    }

    /// Per-cycle deadline: twice the worst expected cycle time, which is
    /// every provider call at its full timeout, the status-poll delays, and
    /// a full OTP wait.
    fn cycle_deadline(&self, config: &WorkerConfig) -> Duration {
        let calls = 4 + u64::from(config.max_retry_status);
        let worst = self.provider_timeout_ms * calls
            + u64::from(config.max_retry_status) * constants::STATUS_RETRY_DELAY_MS
            + self.otp_timeout_ms;
        Duration::from_millis(worst * 2)
    }

    fn outage_exceeded(&self, outage_since: &mut Option<Instant>, err: &anyhow::Error) -> bool {
        let started = outage_since.get_or_insert_with(Instant::now);
        let elapsed = started.elapsed();
        warn!(
            binding_id = %self.binding_id,
            error = %err,
            outage_ms = elapsed.as_millis() as u64,
            "registry unavailable"
        );
        elapsed > Duration::from_millis(self.lock_ttl_ms)
    }
}
