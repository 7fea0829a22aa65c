//! The transaction engine: one purchase cycle per call.
//!
//! A cycle is: precheck balance, start the transaction, classify the first
//! status, rendezvous on an OTP when required, re-poll a bounded number of
//! times, snapshot the outcome. The engine is pure with respect to control
//! state: it reports `{status, stop_condition}` to its caller and never
//! touches the registry.
//!
//! Persistence failures are logged and swallowed (the provider is
//! authoritative; a later cycle re-snapshots); transport failures abort the
//! cycle and surface to the worker, which cools down and tries again next
//! iteration.

mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::constants;
use crate::otp::OtpMailbox;
use crate::provider::{ProviderClient, StatusReport};
use crate::registry::{BindingId, WorkerConfig};

pub use types::{CycleOutcome, OtpStatus, StopCondition, TransactionRecord, TransactionStatus};

/// Runs purchase cycles for one binding.
pub struct TransactionEngine {
    binding_id: BindingId,
    provider: ProviderClient,
    audit: Arc<dyn AuditSink>,
    otp: OtpMailbox,
    otp_timeout: Duration,
}

impl TransactionEngine {
    pub fn new(
        binding_id: BindingId,
        provider: ProviderClient,
        audit: Arc<dyn AuditSink>,
        otp: OtpMailbox,
        otp_timeout: Duration,
    ) -> Self {
        Self {
            binding_id,
            provider,
            audit,
            otp,
            otp_timeout,
        }
    }

    /// Execute one cycle. Returns the terminal classification for the cycle
    /// and, when a hard-stop condition fired, the condition itself.
    ///
    /// An `Err` means the cycle could not run to completion (transport-level
    /// failure); whatever was persisted before the failure stands.
    pub async fn run_cycle(&self, config: &WorkerConfig) -> crate::provider::Result<CycleOutcome> {
        // Precheck: never start a purchase the balance cannot cover.
        let balance = self.provider.get_balance().await?;
        if balance < config.limit_harga {
            return Ok(self.insufficient_balance(config, balance).await);
        }

        // Start the purchase and persist the header before anything else can
        // fail, so the audit trail always has the provider's trx id.
        let receipt = self
            .provider
            .start_transaction(&config.product_id, &config.email, config.limit_harga)
            .await?;

        let mut record = TransactionRecord::new(
            self.binding_id,
            String::new(),
            config.product_id.clone(),
            config.email.clone(),
            config.limit_harga,
        );
        record.balance_start = Some(balance);
        record.t_id = receipt.t_id.clone();
        record.is_success = receipt.is_success;
        record.otp_required = receipt.otp_required;
        record.trx_raw = Some(receipt.raw.clone());

        let Some(trx_id) = receipt.trx_id.clone() else {
            record.trx_id = format!("local-{}", Uuid::new_v4());
            record.status = TransactionStatus::Gagal;
            record.error_message = Some("trx_id_missing".to_string());
            self.persist_transaction(&record).await;
            warn!(binding_id = %self.binding_id, "provider response carried no trx_id");
            return Ok(CycleOutcome {
                status: TransactionStatus::Gagal,
                trx_id: Some(record.trx_id),
                stop: None,
            });
        };
        record.trx_id = trx_id.clone();
        self.persist_transaction(&record).await;

        // First status read, immediately after start.
        let report = self.provider.check_status(&trx_id).await?;
        let mut status = classify_initial(&report);
        record.is_success = report.is_success;
        record.voucher_code = report.voucher_code.clone();
        record.status_raw = Some(report.raw.clone());

        // OTP rendezvous, when the provider demands one and the transaction
        // is not already settled.
        if record.otp_required && status == TransactionStatus::Processing {
            status = self.handle_otp(&mut record, &trx_id).await?;
        }

        // Bounded re-polls while the provider is still processing.
        let mut polls = 0;
        while status == TransactionStatus::Processing && polls < config.max_retry_status {
            tokio::time::sleep(Duration::from_millis(constants::STATUS_RETRY_DELAY_MS)).await;
            let report = self.provider.check_status(&trx_id).await?;
            status = classify_initial(&report);
            record.is_success = report.is_success;
            record.voucher_code = report.voucher_code.clone();
            record.status_raw = Some(report.raw);
            polls += 1;
        }

        // Snapshot: closing balance is best-effort; the status still lands.
        record.balance_end = match self.provider.get_balance().await {
            Ok(closing) => Some(closing),
            Err(err) => {
                warn!(
                    binding_id = %self.binding_id,
                    error = %err,
                    "failed to fetch closing balance"
                );
                None
            }
        };
        record.status = status;
        record.touch();
        self.persist_snapshot(&record).await;

        info!(
            binding_id = %self.binding_id,
            trx_id = %trx_id,
            status = %status,
            "cycle complete"
        );
        crate::metrics::record_cycle(&status.to_string());

        Ok(CycleOutcome {
            status,
            trx_id: Some(trx_id),
            stop: None,
        })
    }

    /// Synthetic failed transaction for a precheck miss; no provider
    /// purchase call is made and the worker is told to stop.
    async fn insufficient_balance(&self, config: &WorkerConfig, balance: i64) -> CycleOutcome {
        let stop = StopCondition::InsufficientBalance {
            balance,
            limit: config.limit_harga,
        };

        let mut record = TransactionRecord::new(
            self.binding_id,
            format!("local-{}", Uuid::new_v4()),
            config.product_id.clone(),
            config.email.clone(),
            config.limit_harga,
        );
        record.status = TransactionStatus::Gagal;
        record.error_message = Some(stop.reason());
        record.balance_start = Some(balance);
        record.balance_end = Some(balance);
        self.persist_transaction(&record).await;

        info!(
            binding_id = %self.binding_id,
            balance,
            limit = config.limit_harga,
            "balance below floor, stopping worker"
        );
        crate::metrics::record_cycle("GAGAL");

        CycleOutcome {
            status: TransactionStatus::Gagal,
            trx_id: Some(record.trx_id),
            stop: Some(stop),
        }
    }

    /// Publish `PENDING`, wait on the mailbox, then submit and re-classify.
    async fn handle_otp(
        &self,
        record: &mut TransactionRecord,
        trx_id: &str,
    ) -> crate::provider::Result<TransactionStatus> {
        // Subscribe before publishing PENDING so a prompt submission cannot
        // land between the two.
        let ticket = self.otp.subscribe(self.binding_id);
        record.otp_status = Some(OtpStatus::Pending);
        record.touch();
        self.persist_transaction(record).await;
        debug!(binding_id = %self.binding_id, "waiting for OTP");

        let Some(otp) = ticket.wait(self.otp_timeout).await else {
            record.otp_status = Some(OtpStatus::Failed);
            record.error_message = Some("otp_timeout".to_string());
            warn!(binding_id = %self.binding_id, "OTP wait timed out");
            return Ok(TransactionStatus::Gagal);
        };

        let receipt = self.provider.submit_otp(&otp).await?;
        if !receipt.accepted {
            record.error_message = receipt.message.clone();
        }

        let report = self.provider.check_status(trx_id).await?;
        let status = classify_after_otp(&report);
        record.is_success = report.is_success;
        record.voucher_code = report.voucher_code.clone();
        record.status_raw = Some(report.raw);
        record.otp_status = Some(match status {
            TransactionStatus::Sukses | TransactionStatus::Suspect => OtpStatus::Success,
            _ => OtpStatus::Failed,
        });
        Ok(status)
    }

    async fn persist_transaction(&self, record: &TransactionRecord) {
        if let Err(err) = self.audit.upsert_transaction(record).await {
            warn!(
                binding_id = %self.binding_id,
                trx_id = %record.trx_id,
                error = %err,
                "failed to persist transaction, continuing"
            );
        }
    }

    async fn persist_snapshot(&self, record: &TransactionRecord) {
        if let Err(err) = self.audit.upsert_snapshot(record).await {
            warn!(
                binding_id = %self.binding_id,
                trx_id = %record.trx_id,
                error = %err,
                "failed to persist snapshot, continuing"
            );
        }
    }
}

/// Classification while a transaction may still settle: a settled report
/// with a voucher is a success, settled without one is suspect, anything
/// else is still processing.
fn classify_initial(report: &StatusReport) -> TransactionStatus {
    if report.is_settled() {
        if report.voucher_code.is_some() {
            TransactionStatus::Sukses
        } else {
            TransactionStatus::Suspect
        }
    } else {
        TransactionStatus::Processing
    }
}

/// Classification after an OTP round: the provider has had its chance, so a
/// non-settled report is a failure rather than "still processing".
fn classify_after_otp(report: &StatusReport) -> TransactionStatus {
    if report.is_settled() {
        if report.voucher_code.is_some() {
            TransactionStatus::Sukses
        } else {
            TransactionStatus::Suspect
        }
    } else {
        TransactionStatus::Gagal
    }
}
