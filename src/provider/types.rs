//! Types for the upstream provider surface.
//!
//! The provider wraps every payload in a `res` envelope; transaction data
//! sits one level deeper under `data`. Only the status fields the engine
//! interprets are lifted into typed fields; the raw payload is kept for the
//! audit trail.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One upstream server an account is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    /// Stable name keying the per-server gate slot (concurrency cap and
    /// outage hold).
    pub name: String,
    /// Base URL, no trailing slash.
    pub base_url: String,
    /// Per-call deadline (milliseconds).
    pub timeout_ms: u64,
    /// Transport retry budget per call.
    pub retries: u32,
    /// Base backoff between transport retries (milliseconds), doubled per
    /// attempt.
    pub backoff_ms: u64,
}

/// The `is_success` value the provider uses for a settled transaction.
pub const IS_SUCCESS_SETTLED: i64 = 2;

/// Parsed response of the purchase endpoint.
#[derive(Debug, Clone)]
pub struct StartReceipt {
    pub trx_id: Option<String>,
    pub t_id: Option<String>,
    pub is_success: Option<i64>,
    pub otp_required: bool,
    /// Raw envelope, persisted with the transaction snapshot.
    pub raw: Value,
}

impl StartReceipt {
    /// Lift the typed fields out of a raw provider envelope.
    pub fn parse(raw: Value) -> Self {
        let data = &raw["res"]["data"];
        Self {
            trx_id: string_field(&data["trx_id"]),
            t_id: string_field(&data["t_id"]),
            is_success: data["is_success"].as_i64(),
            otp_required: data["otp_required"].as_bool().unwrap_or(false),
            raw,
        }
    }
}

/// Parsed response of the status endpoint.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub is_success: Option<i64>,
    pub voucher_code: Option<String>,
    pub raw: Value,
}

impl StatusReport {
    /// Lift the typed fields out of a raw provider envelope.
    pub fn parse(raw: Value) -> Self {
        let data = &raw["res"]["data"];
        Self {
            is_success: data["is_success"].as_i64(),
            voucher_code: string_field(&data["voucher"]).filter(|code| !code.is_empty()),
            raw,
        }
    }

    /// True when the provider reports the transaction settled.
    pub fn is_settled(&self) -> bool {
        self.is_success == Some(IS_SUCCESS_SETTLED)
    }
}

/// Parsed response of the OTP submission endpoint.
#[derive(Debug, Clone)]
pub struct OtpReceipt {
    pub accepted: bool,
    pub message: Option<String>,
    pub raw: Value,
}

impl OtpReceipt {
    /// Lift the typed fields out of a raw provider envelope.
    pub fn parse(raw: Value) -> Self {
        let res = &raw["res"];
        let accepted = res["status"].as_str() == Some("200")
            || res["status_msg"].as_str() == Some("success");
        Self {
            accepted,
            message: string_field(&res["message"]),
            raw,
        }
    }
}

/// Parsed response of the balance endpoint.
pub(super) fn parse_balance(raw: &Value) -> Option<i64> {
    let balance = &raw["res"]["balance"];
    balance
        .as_i64()
        .or_else(|| balance.as_str().and_then(|text| text.parse().ok()))
}

/// Providers are inconsistent about numeric vs string ids; accept both.
fn string_field(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_receipt_parses_envelope() {
        let receipt = StartReceipt::parse(json!({
            "res": {"data": {"trx_id": "TRX-9", "t_id": 41, "is_success": 1}}
        }));
        assert_eq!(receipt.trx_id.as_deref(), Some("TRX-9"));
        assert_eq!(receipt.t_id.as_deref(), Some("41"));
        assert_eq!(receipt.is_success, Some(1));
        assert!(!receipt.otp_required);
    }

    #[test]
    fn test_start_receipt_missing_trx_id() {
        let receipt = StartReceipt::parse(json!({"res": {"data": {}}}));
        assert!(receipt.trx_id.is_none());
    }

    #[test]
    fn test_start_receipt_otp_flag() {
        let receipt = StartReceipt::parse(json!({
            "res": {"data": {"trx_id": "TRX-9", "otp_required": true}}
        }));
        assert!(receipt.otp_required);
    }

    #[test]
    fn test_status_report_settled_with_voucher() {
        let report = StatusReport::parse(json!({
            "res": {"data": {"is_success": 2, "voucher": "ABCD-1234"}}
        }));
        assert!(report.is_settled());
        assert_eq!(report.voucher_code.as_deref(), Some("ABCD-1234"));
    }

    #[test]
    fn test_status_report_empty_voucher_reads_as_absent() {
        let report = StatusReport::parse(json!({
            "res": {"data": {"is_success": 2, "voucher": ""}}
        }));
        assert!(report.is_settled());
        assert!(report.voucher_code.is_none());
    }

    #[test]
    fn test_otp_receipt_accepts_both_markers() {
        let by_status = OtpReceipt::parse(json!({"res": {"status": "200"}}));
        assert!(by_status.accepted);
        let by_msg = OtpReceipt::parse(json!({"res": {"status_msg": "success"}}));
        assert!(by_msg.accepted);
        let rejected =
            OtpReceipt::parse(json!({"res": {"status": "403", "message": "otp salah"}}));
        assert!(!rejected.accepted);
        assert_eq!(rejected.message.as_deref(), Some("otp salah"));
    }

    #[test]
    fn test_balance_parses_number_or_string() {
        assert_eq!(
            parse_balance(&json!({"res": {"balance": 200000}})),
            Some(200_000)
        );
        assert_eq!(
            parse_balance(&json!({"res": {"balance": "150000"}})),
            Some(150_000)
        );
        assert_eq!(parse_balance(&json!({"res": {}})), None);
    }
}
