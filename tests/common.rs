//! Common test utilities for integration tests.
//!
//! Provides a scripted mock provider (a real HTTP server on an ephemeral
//! port) and a harness that wires a full orchestrator - registry, audit
//! store, call gates, OTP mailbox - against it in a temp directory.
//!
//! # Example
//!
//! ```rust,ignore
//! let harness = TestHarness::builder()
//!     .balance(200_000)
//!     .status_default(StatusStep::settled("VCHR-1"))
//!     .start()
//!     .await;
//! harness.start_binding(100_000, 10_000).await;
//! ```

#![allow(dead_code)] // Not every test file uses every helper.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, extract::Query, extract::State, routing::get};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use vord::audit::AuditStore;
use vord::config::{BindingEntry, OrchConfig};
use vord::engine::TransactionRecord;
use vord::orchestrator::Orchestrator;
use vord::provider::ServerEndpoint;
use vord::registry::{BindingId, Registry, WorkerConfig};

/// The binding id every harness test drives.
pub const BINDING: BindingId = BindingId(1);

// =============================================================================
// Scripted Mock Provider
// =============================================================================

/// One scripted response for the status endpoint.
#[derive(Debug, Clone)]
pub struct StatusStep {
    pub is_success: Option<i64>,
    pub voucher: Option<String>,
}

impl StatusStep {
    /// Settled with a voucher code (classifies as SUKSES).
    pub fn settled(voucher: &str) -> Self {
        Self {
            is_success: Some(2),
            voucher: Some(voucher.to_string()),
        }
    }

    /// Settled without a voucher (classifies as SUSPECT).
    pub fn settled_no_voucher() -> Self {
        Self {
            is_success: Some(2),
            voucher: None,
        }
    }

    /// Still processing.
    pub fn processing() -> Self {
        Self {
            is_success: Some(1),
            voucher: None,
        }
    }
}

/// Call counts per endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallCounts {
    pub balance: u32,
    pub start: u32,
    pub status: u32,
    pub otp: u32,
}

#[derive(Debug)]
struct ScriptState {
    balance: i64,
    /// Respond 500 to this many purchase calls before behaving.
    start_failures_remaining: u32,
    otp_required: bool,
    /// Sequential status responses; falls back to `status_default` after.
    status_plan: VecDeque<StatusStep>,
    status_default: StatusStep,
    calls: CallCounts,
    next_trx: u32,
    submitted_otps: Vec<String>,
}

/// Mutable script driving the mock provider's behavior.
pub struct ProviderScript {
    state: Mutex<ScriptState>,
}

impl ProviderScript {
    fn new(
        balance: i64,
        start_failures: u32,
        otp_required: bool,
        status_plan: Vec<StatusStep>,
        status_default: StatusStep,
    ) -> Self {
        Self {
            state: Mutex::new(ScriptState {
                balance,
                start_failures_remaining: start_failures,
                otp_required,
                status_plan: status_plan.into(),
                status_default,
                calls: CallCounts::default(),
                next_trx: 0,
                submitted_otps: Vec::new(),
            }),
        }
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    pub fn submitted_otps(&self) -> Vec<String> {
        self.state.lock().submitted_otps.clone()
    }

    pub fn set_balance(&self, balance: i64) {
        self.state.lock().balance = balance;
    }
}

async fn balance_handler(State(script): State<Arc<ProviderScript>>) -> Json<Value> {
    let mut state = script.state.lock();
    state.calls.balance += 1;
    Json(json!({"res": {"balance": state.balance}}))
}

async fn trx_handler(
    State(script): State<Arc<ProviderScript>>,
) -> Result<Json<Value>, axum::http::StatusCode> {
    let mut state = script.state.lock();
    state.calls.start += 1;
    if state.start_failures_remaining > 0 {
        state.start_failures_remaining -= 1;
        return Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
    state.next_trx += 1;
    let trx_id = format!("TRX-{}", state.next_trx);
    Ok(Json(json!({
        "res": {"data": {
            "trx_id": trx_id,
            "t_id": state.next_trx,
            "is_success": 1,
            "otp_required": state.otp_required,
        }}
    })))
}

async fn status_handler(State(script): State<Arc<ProviderScript>>) -> Json<Value> {
    let mut state = script.state.lock();
    state.calls.status += 1;
    let step = state
        .status_plan
        .pop_front()
        .unwrap_or_else(|| state.status_default.clone());
    let mut data = json!({});
    if let Some(code) = step.is_success {
        data["is_success"] = json!(code);
    }
    if let Some(voucher) = step.voucher {
        data["voucher"] = json!(voucher);
    }
    Json(json!({"res": {"data": data}}))
}

#[derive(serde::Deserialize)]
struct OtpParams {
    otp: Option<String>,
}

async fn otp_handler(
    State(script): State<Arc<ProviderScript>>,
    Query(params): Query<OtpParams>,
) -> Json<Value> {
    let mut state = script.state.lock();
    state.calls.otp += 1;
    if let Some(otp) = params.otp {
        state.submitted_otps.push(otp);
    }
    Json(json!({"res": {"status": "200", "status_msg": "success"}}))
}

/// A running mock provider on an ephemeral port.
pub struct MockProvider {
    pub addr: SocketAddr,
    pub script: Arc<ProviderScript>,
    server: JoinHandle<()>,
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn start_mock_provider(script: Arc<ProviderScript>) -> MockProvider {
    let app = Router::new()
        .route("/balance_pulsa", get(balance_handler))
        .route("/trx_idv", get(trx_handler))
        .route("/status_idv", get(status_handler))
        .route("/otp_idv", get(otp_handler))
        .with_state(Arc::clone(&script));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind mock provider");
    let addr = listener.local_addr().expect("mock provider has no addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockProvider {
        addr,
        script,
        server,
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Builder for the orchestration test harness.
pub struct HarnessBuilder {
    balance: i64,
    start_failures: u32,
    otp_required: bool,
    status_plan: Vec<StatusStep>,
    status_default: StatusStep,
    provider_retries: u32,
    lock_ttl_ms: u64,
    otp_timeout_ms: u64,
}

impl HarnessBuilder {
    pub fn balance(mut self, balance: i64) -> Self {
        self.balance = balance;
        self
    }

    pub fn start_failures(mut self, failures: u32) -> Self {
        self.start_failures = failures;
        self
    }

    pub fn otp_required(mut self) -> Self {
        self.otp_required = true;
        self
    }

    pub fn status_plan(mut self, plan: Vec<StatusStep>) -> Self {
        self.status_plan = plan;
        self
    }

    pub fn status_default(mut self, step: StatusStep) -> Self {
        self.status_default = step;
        self
    }

    pub fn provider_retries(mut self, retries: u32) -> Self {
        self.provider_retries = retries;
        self
    }

    pub fn lock_ttl_ms(mut self, ttl: u64) -> Self {
        self.lock_ttl_ms = ttl;
        self
    }

    pub fn otp_timeout_ms(mut self, timeout: u64) -> Self {
        self.otp_timeout_ms = timeout;
        self
    }

    pub async fn start(self) -> TestHarness {
        let script = Arc::new(ProviderScript::new(
            self.balance,
            self.start_failures,
            self.otp_required,
            self.status_plan,
            self.status_default.clone(),
        ));
        let provider = start_mock_provider(Arc::clone(&script)).await;

        let tmp = TempDir::new().expect("failed to create temp dir");
        let config = OrchConfig {
            api_port: 0,
            registry_path: tmp.path().join("registry.redb"),
            audit_path: tmp.path().join("audit.redb"),
            worker_interval_ms_default: 800,
            max_concurrent_calls: 50,
            max_concurrent_per_server: 2,
            lock_ttl_ms: self.lock_ttl_ms,
            heartbeat_ms: 200,
            otp_timeout_ms: self.otp_timeout_ms,
            servers: vec![ServerEndpoint {
                name: "mock".to_string(),
                base_url: format!("http://{}", provider.addr),
                timeout_ms: 2000,
                retries: self.provider_retries,
                backoff_ms: 20,
            }],
            bindings: vec![BindingEntry {
                id: BINDING.0,
                credential: "628123456789".to_string(),
                server: "mock".to_string(),
            }],
        };

        let registry = Registry::open(&config.registry_path).expect("failed to open registry");
        let audit = Arc::new(AuditStore::open(&config.audit_path).expect("failed to open audit"));
        let orchestrator = Arc::new(Orchestrator::new(
            config,
            registry.clone(),
            Arc::clone(&audit) as Arc<dyn vord::audit::AuditSink>,
        ));

        TestHarness {
            tmp,
            registry,
            audit,
            orchestrator,
            provider,
        }
    }
}

/// A full orchestration stack against the mock provider.
pub struct TestHarness {
    pub tmp: TempDir,
    pub registry: Registry,
    pub audit: Arc<AuditStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub provider: MockProvider,
}

impl TestHarness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            balance: 200_000,
            start_failures: 0,
            otp_required: false,
            status_plan: Vec::new(),
            status_default: StatusStep::settled("VCHR-1"),
            provider_retries: 1,
            lock_ttl_ms: 60_000,
            otp_timeout_ms: 5_000,
        }
    }

    pub fn script(&self) -> &ProviderScript {
        &self.provider.script
    }

    /// Worker config pointing at the default binding.
    pub fn worker_config(limit_harga: i64, interval_ms: u64) -> WorkerConfig {
        WorkerConfig {
            interval_ms,
            max_retry_status: 2,
            cooldown_on_error_ms: 100,
            product_id: "650".to_string(),
            email: "user@example.com".to_string(),
            limit_harga,
        }
    }

    /// Start the default binding and assert per-item success.
    pub async fn start_binding(&self, limit_harga: i64, interval_ms: u64) {
        let items = self
            .orchestrator
            .start(&[BINDING], Self::worker_config(limit_harga, interval_ms))
            .await;
        assert!(items[0].ok, "start failed: {}", items[0].message);
    }

    /// All audited records for the default binding.
    pub fn records(&self) -> Vec<TransactionRecord> {
        self.audit
            .list_for_binding(BINDING)
            .expect("failed to list audit records")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.tmp.path().join("registry.redb")
    }
}

// =============================================================================
// Polling
// =============================================================================

/// Await a condition, polling every 25 ms up to `timeout_ms`.
pub async fn eventually<F>(timeout_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
