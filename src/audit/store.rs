//! redb-backed audit store.
//!
//! One record per `(binding_id, trx_id)` under `trx:{binding_id}:{trx_id}`,
//! JSON-encoded. Snapshots overwrite the header record with the final
//! status and closing balance; re-applied writes are no-ops by construction.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::{Database, ReadableDatabase, TableDefinition};
use std::path::Path;
use std::sync::Arc;

use super::AuditSink;
use crate::engine::TransactionRecord;
use crate::registry::BindingId;

const TRANSACTIONS_TABLE: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("transactions");

/// Durable transaction audit trail.
#[derive(Clone)]
pub struct AuditStore {
    db: Arc<Database>,
}

impl AuditStore {
    /// Opens or creates the audit database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create audit directory: {}", parent.display())
            })?;
        }

        let db = Database::create(path)
            .with_context(|| format!("Failed to open audit database: {}", path.display()))?;

        let write_txn = db
            .begin_write()
            .context("Failed to begin initialization transaction")?;
        {
            let _table = write_txn
                .open_table(TRANSACTIONS_TABLE)
                .context("Failed to initialize transactions table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initialization transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    fn upsert(&self, record: &TransactionRecord) -> Result<()> {
        let key = record_key(record.binding_id, &record.trx_id);
        let json = serde_json::to_vec(record).context("Failed to serialize record to JSON")?;

        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(TRANSACTIONS_TABLE)
                .context("Failed to open transactions table")?;
            table
                .insert(key.as_str(), json.as_slice())
                .with_context(|| format!("Failed to insert record '{key}'"))?;
        }
        write_txn
            .commit()
            .context("Failed to commit record transaction")?;
        Ok(())
    }

    /// Fetch one record, mainly for tests and operator tooling.
    pub fn get(
        &self,
        binding_id: BindingId,
        trx_id: &str,
    ) -> Result<Option<TransactionRecord>> {
        let key = record_key(binding_id, trx_id);
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(TRANSACTIONS_TABLE)
            .context("Failed to open transactions table")?;

        match table
            .get(key.as_str())
            .with_context(|| format!("Failed to read record '{key}'"))?
        {
            Some(guard) => {
                let record: TransactionRecord = serde_json::from_slice(guard.value())
                    .with_context(|| format!("Failed to deserialize record '{key}'"))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All records for one binding, ordered by key.
    pub fn list_for_binding(&self, binding_id: BindingId) -> Result<Vec<TransactionRecord>> {
        let prefix = format!("trx:{binding_id}:");
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(TRANSACTIONS_TABLE)
            .context("Failed to open transactions table")?;

        let mut records = Vec::new();
        for item in table
            .range(prefix.as_str()..)
            .context("Failed to iterate transactions table")?
        {
            let (key, value) = item.context("Failed to read transactions entry")?;
            if !key.value().starts_with(prefix.as_str()) {
                break;
            }
            let record: TransactionRecord = serde_json::from_slice(value.value())
                .with_context(|| format!("Failed to deserialize record '{}'", key.value()))?;
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl AuditSink for AuditStore {
    async fn upsert_transaction(&self, record: &TransactionRecord) -> Result<()> {
        let store = self.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || store.upsert(&record))
            .await
            .context("Task join error")?
    }

    async fn upsert_snapshot(&self, record: &TransactionRecord) -> Result<()> {
        let store = self.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || store.upsert(&record))
            .await
            .context("Task join error")?
    }
}

fn record_key(binding_id: BindingId, trx_id: &str) -> String {
    format!("trx:{binding_id}:{trx_id}")
}
