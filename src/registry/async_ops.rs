//! Async wrappers for `Registry` operations.
//!
//! The registry core is blocking (redb transactions). These wrappers move
//! each call onto the blocking pool so workers and HTTP handlers never stall
//! the async runtime.

use anyhow::{Context, Result};

use super::store::Registry;
use super::types::{
    BindingId, Command, CommandKind, LockRecord, RegistryEntry, WorkerConfig, WorkerHeartbeat,
    WorkerState, WorkerStateRecord,
};

impl Registry {
    pub async fn get_state_async(
        &self,
        binding_id: BindingId,
    ) -> Result<Option<WorkerStateRecord>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.get_state(binding_id))
            .await
            .context("Task join error")?
    }

    pub async fn put_state_async(
        &self,
        binding_id: BindingId,
        state: WorkerState,
        reason: Option<String>,
    ) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.put_state(binding_id, state, reason.as_deref()))
            .await
            .context("Task join error")?
    }

    pub async fn set_state_async(
        &self,
        binding_id: BindingId,
        owner: String,
        state: WorkerState,
        reason: Option<String>,
    ) -> Result<bool> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.set_state(binding_id, &owner, state, reason.as_deref())
        })
        .await
        .context("Task join error")?
    }

    pub async fn put_config_async(
        &self,
        binding_id: BindingId,
        config: WorkerConfig,
    ) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.put_config(binding_id, &config))
            .await
            .context("Task join error")?
    }

    pub async fn get_config_async(&self, binding_id: BindingId) -> Result<Option<WorkerConfig>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.get_config(binding_id))
            .await
            .context("Task join error")?
    }

    pub async fn acquire_lock_async(
        &self,
        binding_id: BindingId,
        owner: String,
        ttl_ms: u64,
    ) -> Result<bool> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.acquire_lock(binding_id, &owner, ttl_ms))
            .await
            .context("Task join error")?
    }

    pub async fn refresh_lock_async(
        &self,
        binding_id: BindingId,
        owner: String,
        ttl_ms: u64,
    ) -> Result<bool> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.refresh_lock(binding_id, &owner, ttl_ms))
            .await
            .context("Task join error")?
    }

    pub async fn release_lock_async(&self, binding_id: BindingId, owner: String) -> Result<bool> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.release_lock(binding_id, &owner))
            .await
            .context("Task join error")?
    }

    pub async fn get_lock_async(&self, binding_id: BindingId) -> Result<Option<LockRecord>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.get_lock(binding_id))
            .await
            .context("Task join error")?
    }

    pub async fn heartbeat_async(
        &self,
        binding_id: BindingId,
        heartbeat: WorkerHeartbeat,
    ) -> Result<bool> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.heartbeat(binding_id, &heartbeat))
            .await
            .context("Task join error")?
    }

    pub async fn get_heartbeat_async(
        &self,
        binding_id: BindingId,
    ) -> Result<Option<WorkerHeartbeat>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.get_heartbeat(binding_id))
            .await
            .context("Task join error")?
    }

    pub async fn enqueue_command_async(
        &self,
        binding_id: BindingId,
        kind: CommandKind,
    ) -> Result<u64> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.enqueue_command(binding_id, kind))
            .await
            .context("Task join error")?
    }

    pub async fn drain_commands_async(&self, binding_id: BindingId) -> Result<Vec<Command>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.drain_commands(binding_id))
            .await
            .context("Task join error")?
    }

    pub async fn snapshot_all_async(&self) -> Result<Vec<RegistryEntry>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.snapshot_all())
            .await
            .context("Task join error")?
    }
}
