//! Durable worker registry backed by redb.
//!
//! The registry is the single source of truth for worker identity and
//! control intent across daemon replicas:
//!
//! - per-binding worker state with owner-guarded compare-and-set
//! - a single-holder lock with TTL (acquire / refresh / release)
//! - heartbeats with a strictly monotonic per-owner cycle counter
//! - FIFO command queues with per-binding sequence numbers
//!
//! The only mandated semantics are *single-holder lock with TTL* and
//! *per-key CAS*; both fall out of redb's serialized write transactions, so
//! they hold for every process sharing the database file.
//!
//! # Async Usage
//!
//! All database operations are blocking. When calling from async contexts
//! (workers, HTTP handlers), use the `_async` methods which wrap operations
//! in `spawn_blocking`.

mod async_ops;
mod store;
mod types;


#[cfg(test)]
mod property_tests;

pub use store::Registry;
pub use types::{
    BindingId, Command, CommandKind, InvalidWorkerConfig, LockRecord, RegistryEntry, WorkerConfig,
    WorkerHeartbeat, WorkerState, WorkerStateRecord,
};
