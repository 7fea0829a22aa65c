//! Orchestrator: spawns and supervises workers, and executes the control
//! operations behind the HTTP API.
//!
//! Every operation is idempotent over a set of binding ids and returns a
//! per-id `{ok, message}` result with short machine-readable messages.
//! Desired state is written to the registry first, then mirrored as a
//! command; workers observe both at their next loop boundary. Cross-replica
//! contention resolves at lock acquisition: losers simply do not run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::config::OrchConfig;
use crate::constants;
use crate::engine::TransactionEngine;
use crate::metrics;
use crate::otp::{OtpMailbox, SubmitOutcome};
use crate::provider::{CallGate, ProviderClient};
use crate::registry::{
    BindingId, CommandKind, Registry, RegistryEntry, WorkerConfig, WorkerState,
};
use crate::worker::{Worker, WorkerExit};

/// Per-binding result of one control action.
#[derive(Debug, Clone)]
pub struct ActionItem {
    pub binding_id: BindingId,
    pub ok: bool,
    pub message: String,
}

impl ActionItem {
    fn ok(binding_id: BindingId, message: &str) -> Self {
        Self {
            binding_id,
            ok: true,
            message: message.to_string(),
        }
    }

    fn failed(binding_id: BindingId, message: &str) -> Self {
        Self {
            binding_id,
            ok: false,
            message: message.to_string(),
        }
    }
}

/// One row of the monitor payload.
#[derive(Debug, Clone)]
pub struct MonitorItem {
    pub binding_id: BindingId,
    pub state: WorkerState,
    pub reason: Option<String>,
    pub state_updated_at: String,
    pub lock_owner: Option<String>,
    pub heartbeat_owner: Option<String>,
    pub heartbeat_cycle: Option<u64>,
    pub heartbeat_last_action: Option<String>,
    pub heartbeat_age_ms: Option<u64>,
}

/// Monitor aggregates plus per-binding rows.
#[derive(Debug, Clone)]
pub struct MonitorSnapshot {
    pub total_workers: usize,
    pub active_workers: usize,
    pub items: Vec<MonitorItem>,
}

/// Process-wide orchestration runtime.
pub struct Orchestrator {
    config: OrchConfig,
    registry: Registry,
    audit: Arc<dyn AuditSink>,
    otp: OtpMailbox,
    gate: Arc<CallGate>,
    instance_id: String,
    tasks: tokio::sync::Mutex<HashMap<BindingId, JoinHandle<WorkerExit>>>,
}

impl Orchestrator {
    pub fn new(config: OrchConfig, registry: Registry, audit: Arc<dyn AuditSink>) -> Self {
        let gate = Arc::new(CallGate::new(
            config.max_concurrent_calls,
            config.max_concurrent_per_server,
        ));
        Self {
            config,
            registry,
            audit,
            otp: OtpMailbox::new(),
            gate,
            instance_id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            tasks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Process identity written into locks and heartbeats: host, pid, and a
    /// per-process nonce, scoped per binding.
    fn owner(&self, binding_id: BindingId) -> String {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        format!(
            "{host}:{pid}:{instance}:{binding_id}",
            pid = std::process::id(),
            instance = self.instance_id
        )
    }

    // =========================================================================
    // Control operations
    // =========================================================================

    /// Start workers for the given bindings with a fresh config.
    pub async fn start(
        self: &Arc<Self>,
        binding_ids: &[BindingId],
        config: WorkerConfig,
    ) -> Vec<ActionItem> {
        let mut items = Vec::with_capacity(binding_ids.len());
        for &binding_id in binding_ids {
            let item = self.start_one(binding_id, &config).await;
            metrics::record_control_action("start", item.ok);
            items.push(item);
        }
        items
    }

    async fn start_one(self: &Arc<Self>, binding_id: BindingId, config: &WorkerConfig) -> ActionItem {
        if self.config.binding_profile(binding_id).is_none() {
            return ActionItem::failed(binding_id, "binding_not_found");
        }

        let state = match self.registry.get_state_async(binding_id).await {
            Ok(record) => record.map(|record| record.state),
            Err(err) => {
                warn!(binding_id = %binding_id, error = %err, "state read failed");
                return ActionItem::failed(binding_id, "registry_error");
            }
        };

        // A running binding with a live lock is already being driven
        // somewhere; still persist the config so the newest one wins at the
        // driver's next boundary.
        if state == Some(WorkerState::Running) {
            let live_lock = self
                .registry
                .get_lock_async(binding_id)
                .await
                .ok()
                .flatten()
                .is_some();
            if live_lock {
                if let Err(err) = self.registry.put_config_async(binding_id, config.clone()).await {
                    warn!(binding_id = %binding_id, error = %err, "config write failed");
                }
                return ActionItem::failed(binding_id, "worker_already_running");
            }
        }

        // Clear intents left over from the previous run so a stale stop
        // cannot kill the worker we are about to spawn.
        if let Err(err) = self.registry.drain_commands_async(binding_id).await {
            warn!(binding_id = %binding_id, error = %err, "stale command drain failed");
        }

        if let Err(err) = self.registry.put_config_async(binding_id, config.clone()).await {
            warn!(binding_id = %binding_id, error = %err, "config write failed");
            return ActionItem::failed(binding_id, "registry_error");
        }
        if let Err(err) = self
            .registry
            .put_state_async(binding_id, WorkerState::Running, None)
            .await
        {
            warn!(binding_id = %binding_id, error = %err, "state write failed");
            return ActionItem::failed(binding_id, "registry_error");
        }
        if let Err(err) = self
            .registry
            .enqueue_command_async(binding_id, CommandKind::Start)
            .await
        {
            warn!(binding_id = %binding_id, error = %err, "command enqueue failed");
        }

        self.spawn_local_worker(binding_id).await;
        ActionItem::ok(binding_id, "start_requested")
    }

    /// Pause running workers; a no-op for bindings in any other state.
    pub async fn pause(&self, binding_ids: &[BindingId], reason: Option<&str>) -> Vec<ActionItem> {
        let reason = reason.unwrap_or("manual_pause");
        let mut items = Vec::with_capacity(binding_ids.len());
        for &binding_id in binding_ids {
            let item = self
                .transition(
                    binding_id,
                    WorkerState::Running,
                    WorkerState::Paused,
                    Some(reason),
                    CommandKind::Pause {
                        reason: Some(reason.to_string()),
                    },
                    "pause_requested",
                    "not_running",
                )
                .await;
            metrics::record_control_action("pause", item.ok);
            items.push(item);
        }
        items
    }

    /// Resume paused workers; a no-op for bindings in any other state.
    pub async fn resume(&self, binding_ids: &[BindingId]) -> Vec<ActionItem> {
        let mut items = Vec::with_capacity(binding_ids.len());
        for &binding_id in binding_ids {
            let item = self
                .transition(
                    binding_id,
                    WorkerState::Paused,
                    WorkerState::Running,
                    None,
                    CommandKind::Resume,
                    "resume_requested",
                    "not_paused",
                )
                .await;
            metrics::record_control_action("resume", item.ok);
            items.push(item);
        }
        items
    }

    /// Request cooperative stop. Always writes `stopped`; workers honor it
    /// at their next loop boundary, never mid-cycle.
    pub async fn stop(&self, binding_ids: &[BindingId], reason: Option<&str>) -> Vec<ActionItem> {
        let reason = reason.unwrap_or("manual_stop");
        let mut items = Vec::with_capacity(binding_ids.len());
        for &binding_id in binding_ids {
            let item = match self
                .registry
                .put_state_async(binding_id, WorkerState::Stopped, Some(reason.to_string()))
                .await
            {
                Ok(()) => {
                    if let Err(err) = self
                        .registry
                        .enqueue_command_async(
                            binding_id,
                            CommandKind::Stop {
                                reason: Some(reason.to_string()),
                            },
                        )
                        .await
                    {
                        warn!(binding_id = %binding_id, error = %err, "command enqueue failed");
                    }
                    ActionItem::ok(binding_id, "stop_requested")
                }
                Err(err) => {
                    warn!(binding_id = %binding_id, error = %err, "state write failed");
                    ActionItem::failed(binding_id, "registry_error")
                }
            };
            metrics::record_control_action("stop", item.ok);
            items.push(item);
        }
        items
    }

    async fn transition(
        &self,
        binding_id: BindingId,
        expected: WorkerState,
        target: WorkerState,
        reason: Option<&str>,
        command: CommandKind,
        ok_message: &str,
        noop_message: &str,
    ) -> ActionItem {
        let current = match self.registry.get_state_async(binding_id).await {
            Ok(record) => record.map(|record| record.state),
            Err(err) => {
                warn!(binding_id = %binding_id, error = %err, "state read failed");
                return ActionItem::failed(binding_id, "registry_error");
            }
        };
        if current != Some(expected) {
            return ActionItem::failed(binding_id, noop_message);
        }

        match self
            .registry
            .put_state_async(binding_id, target, reason.map(str::to_string))
            .await
        {
            Ok(()) => {
                if let Err(err) = self.registry.enqueue_command_async(binding_id, command).await {
                    warn!(binding_id = %binding_id, error = %err, "command enqueue failed");
                }
                ActionItem::ok(binding_id, ok_message)
            }
            Err(err) => {
                warn!(binding_id = %binding_id, error = %err, "state write failed");
                ActionItem::failed(binding_id, "registry_error")
            }
        }
    }

    // =========================================================================
    // OTP ingress
    // =========================================================================

    /// Deliver a user-supplied OTP to the worker waiting on `binding_id`.
    pub fn submit_otp(&self, binding_id: BindingId, otp: String) -> SubmitOutcome {
        self.otp.submit(binding_id, otp)
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    /// Worker state rows for the given bindings.
    pub async fn status(&self, binding_ids: &[BindingId]) -> anyhow::Result<Vec<MonitorItem>> {
        let mut items = Vec::with_capacity(binding_ids.len());
        for &binding_id in binding_ids {
            let record = self.registry.get_state_async(binding_id).await?;
            items.push(match record {
                Some(record) => MonitorItem {
                    binding_id,
                    state: record.state,
                    reason: record.reason,
                    state_updated_at: record.updated_at.to_rfc3339(),
                    lock_owner: record.owner,
                    heartbeat_owner: None,
                    heartbeat_cycle: None,
                    heartbeat_last_action: None,
                    heartbeat_age_ms: None,
                },
                None => MonitorItem {
                    binding_id,
                    state: WorkerState::Idle,
                    reason: Some("not_found".to_string()),
                    state_updated_at: String::new(),
                    lock_owner: None,
                    heartbeat_owner: None,
                    heartbeat_cycle: None,
                    heartbeat_last_action: None,
                    heartbeat_age_ms: None,
                },
            });
        }
        Ok(items)
    }

    /// Full registry snapshot with liveness aggregates.
    pub async fn monitor(&self) -> anyhow::Result<MonitorSnapshot> {
        let entries = self.registry.snapshot_all_async().await?;
        let now = Utc::now();

        let mut items = Vec::with_capacity(entries.len());
        let mut active_workers = 0;
        for entry in &entries {
            if entry.lock.is_some() && entry.state.state == WorkerState::Running {
                active_workers += 1;
            }
            items.push(monitor_item(entry, now));
        }

        Ok(MonitorSnapshot {
            total_workers: entries.len(),
            active_workers,
            items,
        })
    }

    // =========================================================================
    // Worker supervision
    // =========================================================================

    /// Spawn a worker task for the binding unless this process already runs
    /// one. Lock acquisition inside the worker settles cross-replica races.
    async fn spawn_local_worker(self: &Arc<Self>, binding_id: BindingId) {
        let Some((binding, server)) = self.config.binding_profile(binding_id) else {
            return;
        };
        let provider = ProviderClient::new(
            server.clone(),
            binding.credential.clone(),
            Arc::clone(&self.gate),
        );
        let engine = TransactionEngine::new(
            binding_id,
            provider,
            Arc::clone(&self.audit),
            self.otp.clone(),
            Duration::from_millis(self.config.otp_timeout_ms),
        );
        let worker = Worker::new(
            binding_id,
            self.owner(binding_id),
            self.registry.clone(),
            engine,
            self.config.lock_ttl_ms,
            self.config.heartbeat_ms,
            self.config.otp_timeout_ms,
            server.timeout_ms,
        );

        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, handle| !handle.is_finished());
        if tasks.contains_key(&binding_id) {
            info!(binding_id = %binding_id, "worker already running locally");
            return;
        }
        tasks.insert(binding_id, tokio::spawn(worker.run()));
        metrics::set_active_workers(tasks.len());
        info!(binding_id = %binding_id, "worker spawned");
    }

    /// Number of live worker tasks in this process.
    pub async fn local_worker_count(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, handle| !handle.is_finished());
        metrics::set_active_workers(tasks.len());
        tasks.len()
    }

    /// Graceful drain: request a boundary stop for every locally supervised
    /// binding and wait for the loops to exit.
    pub async fn shutdown(&self) {
        let handles: Vec<(BindingId, JoinHandle<WorkerExit>)> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain().collect()
        };
        if handles.is_empty() {
            return;
        }

        info!(workers = handles.len(), "draining local workers");
        for (binding_id, _) in &handles {
            if let Err(err) = self
                .registry
                .put_state_async(
                    *binding_id,
                    WorkerState::Stopped,
                    Some("daemon_shutdown".to_string()),
                )
                .await
            {
                warn!(binding_id = %binding_id, error = %err, "failed to request stop");
            }
        }

        let drain = Duration::from_millis(constants::SHUTDOWN_DRAIN_TIMEOUT_MS);
        for (binding_id, handle) in handles {
            match tokio::time::timeout(drain, handle).await {
                Ok(Ok(exit)) => info!(binding_id = %binding_id, exit = ?exit, "worker drained"),
                Ok(Err(err)) => warn!(binding_id = %binding_id, error = %err, "worker task failed"),
                Err(_) => warn!(binding_id = %binding_id, "worker did not drain in time"),
            }
        }
        metrics::set_active_workers(0);
        info!("worker drain complete");
    }
}

fn monitor_item(entry: &RegistryEntry, now: chrono::DateTime<Utc>) -> MonitorItem {
    MonitorItem {
        binding_id: entry.binding_id,
        state: entry.state.state,
        reason: entry.state.reason.clone(),
        state_updated_at: entry.state.updated_at.to_rfc3339(),
        lock_owner: entry.lock.as_ref().map(|lock| lock.owner.clone()),
        heartbeat_owner: entry.heartbeat.as_ref().map(|hb| hb.owner.clone()),
        heartbeat_cycle: entry.heartbeat.as_ref().map(|hb| hb.cycle),
        heartbeat_last_action: entry.heartbeat.as_ref().map(|hb| hb.last_action.clone()),
        heartbeat_age_ms: entry.heartbeat.as_ref().map(|hb| {
            now.signed_duration_since(hb.updated_at)
                .num_milliseconds()
                .max(0) as u64
        }),
    }
}
