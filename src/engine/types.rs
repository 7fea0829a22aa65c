//! Transaction record types shared by the engine and the audit trail.
//!
//! Status strings are wire-exact: downstream tooling matches on the
//! uppercase values, so serde renames are load-bearing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::registry::BindingId;

/// Transaction lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Processing,
    Paused,
    Resumed,
    Sukses,
    Suspect,
    Gagal,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Processing => "PROCESSING",
            Self::Paused => "PAUSED",
            Self::Resumed => "RESUMED",
            Self::Sukses => "SUKSES",
            Self::Suspect => "SUSPECT",
            Self::Gagal => "GAGAL",
        };
        f.write_str(name)
    }
}

/// OTP handling status for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OtpStatus {
    Pending,
    Success,
    Failed,
}

/// One audited transaction, keyed by `(binding_id, trx_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub binding_id: BindingId,
    /// Provider transaction id, or a locally generated `local-<uuid>` for
    /// synthetic records that never reached the provider.
    pub trx_id: String,
    pub t_id: Option<String>,
    pub status: TransactionStatus,
    pub product_id: String,
    pub email: String,
    pub limit_harga: i64,
    pub is_success: Option<i64>,
    pub balance_start: Option<i64>,
    pub balance_end: Option<i64>,
    pub voucher_code: Option<String>,
    pub error_message: Option<String>,
    pub otp_required: bool,
    pub otp_status: Option<OtpStatus>,
    /// Raw provider envelopes, kept for the audit trail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trx_raw: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_raw: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Fresh record with `PROCESSING` status and no outcome fields yet.
    pub fn new(
        binding_id: BindingId,
        trx_id: String,
        product_id: String,
        email: String,
        limit_harga: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            binding_id,
            trx_id,
            t_id: None,
            status: TransactionStatus::Processing,
            product_id,
            email,
            limit_harga,
            is_success: None,
            balance_start: None,
            balance_end: None,
            voucher_code: None,
            error_message: None,
            otp_required: false,
            otp_status: None,
            trx_raw: None,
            status_raw: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A condition that forces the worker to stop at the next boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCondition {
    /// Pre-transaction balance below the configured floor; no purchase call
    /// was made.
    InsufficientBalance { balance: i64, limit: i64 },
}

impl StopCondition {
    /// Machine-readable reason written to the transaction and the worker
    /// state record.
    pub fn reason(&self) -> String {
        match self {
            Self::InsufficientBalance { balance, limit } => {
                format!("insufficient_balance_before_start:{balance}<{limit}")
            }
        }
    }
}

/// What one engine cycle produced.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub status: TransactionStatus,
    /// Transaction id persisted for this cycle, when one was written.
    pub trx_id: Option<String>,
    /// Set when the worker must transition to `stopped`.
    pub stop: Option<StopCondition>,
}
