//! Core `Registry` implementation with synchronous operations.
//!
//! All records live in a single redb table under semantic keys
//! (`wrk:state:{id}`, `wrk:cfg:{id}`, `wrk:lock:{id}`, `wrk:hb:{id}`,
//! `wrk:cmd:{id}`), JSON-encoded. redb serializes write transactions, which
//! makes every read-modify-write below an atomic check-and-set across all
//! processes sharing the database file.

use anyhow::{Context, Result};
use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::{
    BindingId, Command, CommandKind, CommandQueue, LockRecord, RegistryEntry, WorkerConfig,
    WorkerHeartbeat, WorkerState, WorkerStateRecord,
};

/// Table holding every registry record.
const REGISTRY_TABLE: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("registry");

const STATE_PREFIX: &str = "wrk:state:";

/// Durable worker registry: state, config, single-holder lock, heartbeat,
/// and command queue per binding.
///
/// # Thread Safety
///
/// `Registry` is `Clone` and can be shared across threads and processes; the
/// underlying database handles concurrent access safely.
#[derive(Clone)]
pub struct Registry {
    db: Arc<Database>,
}

impl Registry {
    /// Opens or creates the registry database at the given path.
    ///
    /// Creates parent directories if needed and initializes the table on
    /// first open so reads never observe a missing table.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create registry directory: {}", parent.display())
            })?;
        }

        let db = Database::create(path)
            .with_context(|| format!("Failed to open registry database: {}", path.display()))?;

        let write_txn = db
            .begin_write()
            .context("Failed to begin initialization transaction")?;
        {
            let _table = write_txn
                .open_table(REGISTRY_TABLE)
                .context("Failed to initialize registry table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initialization transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    // =========================================================================
    // Worker state
    // =========================================================================

    /// Returns the current state record, if any command has ever touched the
    /// binding.
    pub fn get_state(&self, binding_id: BindingId) -> Result<Option<WorkerStateRecord>> {
        self.read_value(&state_key(binding_id))
    }

    /// Unguarded state write, reserved for the control plane.
    ///
    /// Preserves the stored owner except on transitions to `stopped`/`idle`,
    /// which clear it.
    pub fn put_state(
        &self,
        binding_id: BindingId,
        state: WorkerState,
        reason: Option<&str>,
    ) -> Result<()> {
        let key = state_key(binding_id);
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(REGISTRY_TABLE)
                .context("Failed to open registry table")?;

            let previous: Option<WorkerStateRecord> = read_from(&table, &key)?;
            let owner = match state {
                WorkerState::Stopped | WorkerState::Idle => None,
                WorkerState::Running | WorkerState::Paused => {
                    previous.and_then(|record| record.owner)
                }
            };
            let record = WorkerStateRecord {
                binding_id,
                state,
                reason: reason.map(str::to_string),
                owner,
                updated_at: Utc::now(),
            };
            write_into(&mut table, &key, &record)?;
        }
        write_txn
            .commit()
            .context("Failed to commit state transaction")?;
        Ok(())
    }

    /// Owner-guarded state write, used by workers.
    ///
    /// Succeeds only while `owner` holds the binding's live lock; on success
    /// the record's `owner` field is set to the caller. Returns `false`
    /// without mutating anything on mismatch.
    pub fn set_state(
        &self,
        binding_id: BindingId,
        owner: &str,
        state: WorkerState,
        reason: Option<&str>,
    ) -> Result<bool> {
        let key = state_key(binding_id);
        let now_ms = now_epoch_ms()?;
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let updated = {
            let mut table = write_txn
                .open_table(REGISTRY_TABLE)
                .context("Failed to open registry table")?;

            let lock: Option<LockRecord> = read_from(&table, &lock_key(binding_id))?;
            let owned = lock.is_some_and(|lock| !lock.is_expired(now_ms) && lock.owner == owner);
            if owned {
                let record = WorkerStateRecord {
                    binding_id,
                    state,
                    reason: reason.map(str::to_string),
                    owner: match state {
                        WorkerState::Stopped | WorkerState::Idle => None,
                        WorkerState::Running | WorkerState::Paused => Some(owner.to_string()),
                    },
                    updated_at: Utc::now(),
                };
                write_into(&mut table, &key, &record)?;
            }
            owned
        };
        write_txn
            .commit()
            .context("Failed to commit state transaction")?;
        Ok(updated)
    }

    // =========================================================================
    // Worker config
    // =========================================================================

    pub fn put_config(&self, binding_id: BindingId, config: &WorkerConfig) -> Result<()> {
        self.write_value(&config_key(binding_id), config)
    }

    pub fn get_config(&self, binding_id: BindingId) -> Result<Option<WorkerConfig>> {
        self.read_value(&config_key(binding_id))
    }

    // =========================================================================
    // Lock
    // =========================================================================

    /// Acquire the binding's lock for `owner` with the given TTL.
    ///
    /// Succeeds only when no live lock exists; an expired lock is claimable.
    pub fn acquire_lock(&self, binding_id: BindingId, owner: &str, ttl_ms: u64) -> Result<bool> {
        let key = lock_key(binding_id);
        let now_ms = now_epoch_ms()?;
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let acquired = {
            let mut table = write_txn
                .open_table(REGISTRY_TABLE)
                .context("Failed to open registry table")?;

            let current: Option<LockRecord> = read_from(&table, &key)?;
            let free = current.is_none_or(|lock| lock.is_expired(now_ms));
            if free {
                let record = LockRecord {
                    owner: owner.to_string(),
                    expires_at_ms: now_ms + ttl_ms,
                };
                write_into(&mut table, &key, &record)?;
            }
            free
        };
        write_txn
            .commit()
            .context("Failed to commit lock transaction")?;
        Ok(acquired)
    }

    /// Extend the lock TTL; succeeds only while `owner` still holds a live
    /// lock.
    pub fn refresh_lock(&self, binding_id: BindingId, owner: &str, ttl_ms: u64) -> Result<bool> {
        let key = lock_key(binding_id);
        let now_ms = now_epoch_ms()?;
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let refreshed = {
            let mut table = write_txn
                .open_table(REGISTRY_TABLE)
                .context("Failed to open registry table")?;

            let current: Option<LockRecord> = read_from(&table, &key)?;
            let owned =
                current.is_some_and(|lock| !lock.is_expired(now_ms) && lock.owner == owner);
            if owned {
                let record = LockRecord {
                    owner: owner.to_string(),
                    expires_at_ms: now_ms + ttl_ms,
                };
                write_into(&mut table, &key, &record)?;
            }
            owned
        };
        write_txn
            .commit()
            .context("Failed to commit lock transaction")?;
        Ok(refreshed)
    }

    /// Release the lock; succeeds only on owner match, so a lock stolen
    /// after TTL expiry cannot be released by the previous holder.
    pub fn release_lock(&self, binding_id: BindingId, owner: &str) -> Result<bool> {
        let key = lock_key(binding_id);
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let released = {
            let mut table = write_txn
                .open_table(REGISTRY_TABLE)
                .context("Failed to open registry table")?;

            let current: Option<LockRecord> = read_from(&table, &key)?;
            let owned = current.is_some_and(|lock| lock.owner == owner);
            if owned {
                table
                    .remove(key.as_str())
                    .with_context(|| format!("Failed to remove key '{key}'"))?;
            }
            owned
        };
        write_txn
            .commit()
            .context("Failed to commit lock transaction")?;
        Ok(released)
    }

    /// Current live lock holder, if any. Expired locks read as absent.
    pub fn get_lock(&self, binding_id: BindingId) -> Result<Option<LockRecord>> {
        let now_ms = now_epoch_ms()?;
        let lock: Option<LockRecord> = self.read_value(&lock_key(binding_id))?;
        Ok(lock.filter(|lock| !lock.is_expired(now_ms)))
    }

    // =========================================================================
    // Heartbeat
    // =========================================================================

    /// Best-effort heartbeat write.
    ///
    /// Rejected (returns `false`) when a different owner holds the live lock.
    pub fn heartbeat(&self, binding_id: BindingId, heartbeat: &WorkerHeartbeat) -> Result<bool> {
        let now_ms = now_epoch_ms()?;
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let accepted = {
            let mut table = write_txn
                .open_table(REGISTRY_TABLE)
                .context("Failed to open registry table")?;

            let lock: Option<LockRecord> = read_from(&table, &lock_key(binding_id))?;
            let contested =
                lock.is_some_and(|lock| !lock.is_expired(now_ms) && lock.owner != heartbeat.owner);
            if !contested {
                write_into(&mut table, &heartbeat_key(binding_id), heartbeat)?;
            }
            !contested
        };
        write_txn
            .commit()
            .context("Failed to commit heartbeat transaction")?;
        Ok(accepted)
    }

    pub fn get_heartbeat(&self, binding_id: BindingId) -> Result<Option<WorkerHeartbeat>> {
        self.read_value(&heartbeat_key(binding_id))
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Append a command to the binding's queue and return its sequence
    /// number. Sequence numbers are monotonic per binding and never reused,
    /// so consumers can detect redelivery.
    pub fn enqueue_command(&self, binding_id: BindingId, kind: CommandKind) -> Result<u64> {
        let key = command_key(binding_id);
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let seq = {
            let mut table = write_txn
                .open_table(REGISTRY_TABLE)
                .context("Failed to open registry table")?;

            let mut queue: CommandQueue = read_from(&table, &key)?.unwrap_or_default();
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.items.push(Command {
                seq,
                kind,
                issued_at: Utc::now(),
            });
            write_into(&mut table, &key, &queue)?;
            seq
        };
        write_txn
            .commit()
            .context("Failed to commit command transaction")?;
        Ok(seq)
    }

    /// Remove and return all queued commands for the binding, in FIFO order.
    pub fn drain_commands(&self, binding_id: BindingId) -> Result<Vec<Command>> {
        let key = command_key(binding_id);
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let drained = {
            let mut table = write_txn
                .open_table(REGISTRY_TABLE)
                .context("Failed to open registry table")?;

            let queue: Option<CommandQueue> = read_from(&table, &key)?;
            match queue {
                Some(mut queue) if !queue.items.is_empty() => {
                    let items = std::mem::take(&mut queue.items);
                    write_into(&mut table, &key, &queue)?;
                    items
                }
                _ => Vec::new(),
            }
        };
        write_txn
            .commit()
            .context("Failed to commit command transaction")?;
        Ok(drained)
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Walk every binding with a state record and join its lock and
    /// heartbeat. Consistency is per-entry, not global.
    pub fn snapshot_all(&self) -> Result<Vec<RegistryEntry>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(REGISTRY_TABLE)
            .context("Failed to open registry table")?;

        let now_ms = now_epoch_ms()?;
        let mut entries = Vec::new();
        for item in table
            .range(STATE_PREFIX..)
            .context("Failed to iterate registry table")?
        {
            let (key, value) = item.context("Failed to read registry entry")?;
            let key_str = key.value();
            if !key_str.starts_with(STATE_PREFIX) {
                break;
            }

            let state: WorkerStateRecord = serde_json::from_slice(value.value())
                .with_context(|| format!("Failed to deserialize entry for key '{key_str}'"))?;
            let binding_id = state.binding_id;
            let lock: Option<LockRecord> = read_from(&table, &lock_key(binding_id))?;
            let heartbeat: Option<WorkerHeartbeat> =
                read_from(&table, &heartbeat_key(binding_id))?;

            entries.push(RegistryEntry {
                binding_id,
                state,
                lock: lock.filter(|lock| !lock.is_expired(now_ms)),
                heartbeat,
            });
        }

        entries.sort_by_key(|entry| entry.binding_id);
        Ok(entries)
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn read_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(REGISTRY_TABLE)
            .context("Failed to open registry table")?;
        read_from(&table, key)
    }

    fn write_value<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(REGISTRY_TABLE)
                .context("Failed to open registry table")?;
            write_into(&mut table, key, value)?;
        }
        write_txn
            .commit()
            .context("Failed to commit write transaction")?;
        Ok(())
    }
}

fn read_from<T, Tbl>(table: &Tbl, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    let result = table
        .get(key)
        .with_context(|| format!("Failed to read key '{key}'"))?;
    match result {
        Some(guard) => {
            let value: T = serde_json::from_slice(guard.value())
                .with_context(|| format!("Failed to deserialize entry for key '{key}'"))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn write_into<T: Serialize>(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_vec(value).context("Failed to serialize entry to JSON")?;
    table
        .insert(key, json.as_slice())
        .with_context(|| format!("Failed to insert key '{key}'"))?;
    Ok(())
}

/// Current wall clock as Unix epoch milliseconds.
fn now_epoch_ms() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System time before UNIX epoch")?
        .as_millis() as u64)
}

fn state_key(binding_id: BindingId) -> String {
    format!("{STATE_PREFIX}{binding_id}")
}

fn config_key(binding_id: BindingId) -> String {
    format!("wrk:cfg:{binding_id}")
}

fn lock_key(binding_id: BindingId) -> String {
    format!("wrk:lock:{binding_id}")
}

fn heartbeat_key(binding_id: BindingId) -> String {
    format!("wrk:hb:{binding_id}")
}

fn command_key(binding_id: BindingId) -> String {
    format!("wrk:cmd:{binding_id}")
}
