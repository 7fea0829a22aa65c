//! Persistence port for transaction records.
//!
//! The engine writes its audit trail through [`AuditSink`] and never reads
//! it back to decide behavior; the provider stays the source of truth. Both
//! operations are idempotent on `(binding_id, trx_id)`, so redelivered or
//! re-run writes converge instead of duplicating.

mod store;

use async_trait::async_trait;

use crate::engine::TransactionRecord;

pub use store::AuditStore;

/// Outbound persistence port for the transaction engine.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record a transaction header (initial or updated).
    async fn upsert_transaction(&self, record: &TransactionRecord) -> anyhow::Result<()>;

    /// Record the end-of-cycle snapshot (final status, closing balance).
    async fn upsert_snapshot(&self, record: &TransactionRecord) -> anyhow::Result<()>;
}
