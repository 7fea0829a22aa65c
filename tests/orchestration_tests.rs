//! End-to-end orchestration scenarios against a scripted mock provider.
//!
//! Each test wires a real orchestrator (registry + audit store in a temp
//! dir, real worker tasks, real HTTP calls to a local mock provider) and
//! drives one scenario:
//!
//! 1. happy path - one cycle, SUKSES, worker keeps running
//! 2. OTP flow - PENDING -> SUCCESS rendezvous
//! 3. insufficient balance - synthetic GAGAL, hard stop, no purchase call
//! 4. cooperative stop - in-flight cycle completes, no new cycle starts
//! 5. lock loss - stale owner exits without releasing the thief's lock
//! 6. transport failure - no record, cooldown, retry next iteration

#[path = "common.rs"]
mod common;

use std::time::{Duration, Instant};

use common::{BINDING, StatusStep, TestHarness, eventually};
use vord::engine::{OtpStatus, TransactionStatus};
use vord::registry::WorkerState;

/// Await the orchestrator's local worker count reaching zero.
async fn drained(harness: &TestHarness, timeout_ms: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if harness.orchestrator.local_worker_count().await == 0 {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_single_cycle() {
    let harness = TestHarness::builder()
        .balance(200_000)
        .status_default(StatusStep::settled("VCHR-7"))
        .start()
        .await;

    // Long interval so exactly one cycle runs inside the test window.
    harness.start_binding(100_000, 10_000).await;

    assert!(
        eventually(5_000, || {
            harness
                .records()
                .iter()
                .any(|record| record.status == TransactionStatus::Sukses)
        })
        .await,
        "no SUKSES record appeared"
    );

    let records = harness.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.voucher_code.as_deref(), Some("VCHR-7"));
    assert_eq!(record.balance_start, Some(200_000));
    assert!(record.balance_end <= record.balance_start);
    assert!(!record.otp_required);

    // Worker stays running after a successful cycle, with one heartbeat.
    let heartbeat = harness.registry.get_heartbeat(BINDING).unwrap().unwrap();
    assert_eq!(heartbeat.cycle, 1);
    assert!(heartbeat.last_action.contains("SUKSES"));
    let state = harness.registry.get_state(BINDING).unwrap().unwrap();
    assert_eq!(state.state, WorkerState::Running);

    harness.orchestrator.stop(&[BINDING], None).await;
    assert!(drained(&harness, 5_000).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn otp_flow_pending_to_success() {
    let harness = TestHarness::builder()
        .otp_required()
        .status_plan(vec![StatusStep::processing()])
        .status_default(StatusStep::settled("VCHR-OTP"))
        .start()
        .await;

    harness.start_binding(100_000, 10_000).await;

    // The worker publishes PENDING and blocks on the rendezvous.
    assert!(
        eventually(5_000, || {
            harness
                .records()
                .iter()
                .any(|record| record.otp_status == Some(OtpStatus::Pending))
        })
        .await,
        "worker never published otp_status=PENDING"
    );

    let outcome = harness
        .orchestrator
        .submit_otp(BINDING, "123456".to_string());
    assert!(outcome.reason().is_none(), "OTP not accepted: {outcome:?}");

    assert!(
        eventually(5_000, || {
            harness.records().iter().any(|record| {
                record.status == TransactionStatus::Sukses
                    && record.otp_status == Some(OtpStatus::Success)
            })
        })
        .await,
        "OTP flow never settled"
    );
    assert_eq!(harness.script().submitted_otps(), vec!["123456"]);

    harness.orchestrator.stop(&[BINDING], None).await;
    assert!(drained(&harness, 5_000).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn insufficient_balance_hard_stops() {
    let harness = TestHarness::builder().balance(50_000).start().await;

    harness.start_binding(100_000, 10_000).await;

    assert!(
        eventually(5_000, || {
            harness
                .registry
                .get_state(BINDING)
                .ok()
                .flatten()
                .is_some_and(|record| record.state == WorkerState::Stopped)
        })
        .await,
        "worker never stopped"
    );

    let state = harness.registry.get_state(BINDING).unwrap().unwrap();
    let reason = state.reason.unwrap();
    assert!(
        reason.starts_with("insufficient_balance_before_start:"),
        "unexpected stop reason: {reason}"
    );

    // No purchase call was made; the synthetic record carries both balances.
    assert_eq!(harness.script().calls().start, 0);
    let records = harness.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TransactionStatus::Gagal);
    assert!(records[0].trx_id.starts_with("local-"));
    assert_eq!(records[0].balance_start, Some(50_000));
    assert_eq!(records[0].balance_end, records[0].balance_start);
    assert!(
        records[0]
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("insufficient_balance_before_start:")
    );

    assert!(drained(&harness, 5_000).await, "worker did not exit");
    assert!(harness.registry.get_lock(BINDING).unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn cooperative_stop_finishes_inflight_cycle() {
    // Status never settles, so each cycle runs its full re-poll budget and
    // gives us a wide mid-cycle window.
    let harness = TestHarness::builder()
        .status_default(StatusStep::processing())
        .start()
        .await;

    harness.start_binding(100_000, 10_000).await;
    assert!(
        eventually(3_000, || harness.script().calls().start >= 1).await,
        "first cycle never started"
    );

    // Stop lands mid-cycle.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let items = harness
        .orchestrator
        .stop(&[BINDING], Some("operator_stop"))
        .await;
    assert!(items[0].ok);

    // The in-flight cycle completes (outcome persisted, heartbeat written),
    // then the worker exits at the boundary.
    assert!(drained(&harness, 10_000).await, "worker did not exit");

    let records = harness.records();
    assert_eq!(records.len(), 1, "cycle outcome was not persisted");
    assert_eq!(records[0].status, TransactionStatus::Processing);

    let heartbeat = harness.registry.get_heartbeat(BINDING).unwrap().unwrap();
    assert_eq!(heartbeat.cycle, 1);

    // No new purchase after the stop was delivered.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.script().calls().start, 1);

    let state = harness.registry.get_state(BINDING).unwrap().unwrap();
    assert_eq!(state.state, WorkerState::Stopped);
    assert_eq!(state.reason.as_deref(), Some("operator_stop"));
    assert!(harness.registry.get_lock(BINDING).unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn lock_loss_exits_without_release() {
    // TTL shorter than the iteration interval: the lock expires during the
    // worker's inter-cycle sleep.
    let harness = TestHarness::builder().lock_ttl_ms(400).start().await;

    harness.start_binding(100_000, 1_000).await;
    assert!(
        eventually(3_000, || harness.script().calls().start == 1).await,
        "first cycle never ran"
    );

    // Let the TTL lapse mid-sleep, then steal the lock.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(
        harness
            .registry
            .acquire_lock(BINDING, "intruder", 60_000)
            .unwrap(),
        "expired lock should be claimable"
    );

    // The stale owner notices at its next refresh and exits.
    assert!(drained(&harness, 5_000).await, "stale worker did not exit");

    // It must not have released the thief's lock on the way out.
    let lock = harness.registry.get_lock(BINDING).unwrap().unwrap();
    assert_eq!(lock.owner, "intruder");

    // Exactly one of the two owners produced the transaction.
    assert_eq!(harness.script().calls().start, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_failure_cools_down_and_retries() {
    let harness = TestHarness::builder()
        .start_failures(u32::MAX)
        .provider_retries(1)
        .start()
        .await;

    harness.start_binding(100_000, 100).await;

    // Two transport attempts per cycle (initial + one retry); at least two
    // cycles means the worker kept going after the cooldown.
    assert!(
        eventually(8_000, || harness.script().calls().start >= 4).await,
        "worker did not retry after transport failure"
    );

    // No transaction record was written; the failure never reached start.
    assert!(harness.records().is_empty());

    let state = harness.registry.get_state(BINDING).unwrap().unwrap();
    assert_eq!(state.state, WorkerState::Running);
    let heartbeat = harness.registry.get_heartbeat(BINDING).unwrap().unwrap();
    assert!(heartbeat.last_action.contains("cycle_error"));

    harness.orchestrator.stop(&[BINDING], None).await;
    assert!(drained(&harness, 5_000).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn start_twice_keeps_one_worker_with_later_config() {
    let harness = TestHarness::builder().start().await;

    harness.start_binding(100_000, 10_000).await;
    assert!(
        eventually(3_000, || harness
            .registry
            .get_lock(BINDING)
            .ok()
            .flatten()
            .is_some())
        .await,
        "worker never took the lock"
    );

    // Second start: rejected as already running, but the later config wins.
    let later = TestHarness::worker_config(150_000, 10_000);
    let items = harness.orchestrator.start(&[BINDING], later.clone()).await;
    assert!(!items[0].ok);
    assert_eq!(items[0].message, "worker_already_running");
    assert_eq!(
        harness.registry.get_config(BINDING).unwrap().unwrap(),
        later
    );
    assert_eq!(harness.orchestrator.local_worker_count().await, 1);

    harness.orchestrator.stop(&[BINDING], None).await;
    assert!(drained(&harness, 5_000).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_without_worker_is_a_stopping_noop() {
    let harness = TestHarness::builder().start().await;

    let items = harness.orchestrator.stop(&[BINDING], None).await;
    assert!(items[0].ok);

    let state = harness.registry.get_state(BINDING).unwrap().unwrap();
    assert_eq!(state.state, WorkerState::Stopped);
    assert_eq!(state.reason.as_deref(), Some("manual_stop"));
    assert_eq!(harness.script().calls().start, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_blocks_cycles_until_resume() {
    let harness = TestHarness::builder().start().await;

    harness.start_binding(100_000, 100).await;
    assert!(
        eventually(3_000, || harness.script().calls().start >= 1).await,
        "first cycle never ran"
    );

    let items = harness.orchestrator.pause(&[BINDING], None).await;
    assert!(items[0].ok);

    // Wait for the pause to take effect at a boundary, then confirm no new
    // purchases happen while paused.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let paused_at = harness.script().calls().start;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.script().calls().start, paused_at);

    let state = harness.registry.get_state(BINDING).unwrap().unwrap();
    assert_eq!(state.state, WorkerState::Paused);

    // Pausing again is a no-op on a non-running worker.
    let items = harness.orchestrator.pause(&[BINDING], None).await;
    assert!(!items[0].ok);
    assert_eq!(items[0].message, "not_running");

    let items = harness.orchestrator.resume(&[BINDING]).await;
    assert!(items[0].ok);
    assert!(
        eventually(3_000, || harness.script().calls().start > paused_at).await,
        "worker never resumed cycling"
    );

    harness.orchestrator.stop(&[BINDING], None).await;
    assert!(drained(&harness, 5_000).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_cycles_are_strictly_monotonic() {
    let harness = TestHarness::builder().start().await;
    harness.start_binding(100_000, 100).await;

    let mut observed = Vec::new();
    let deadline = Instant::now() + Duration::from_millis(1_500);
    while Instant::now() < deadline {
        if let Some(heartbeat) = harness.registry.get_heartbeat(BINDING).unwrap() {
            if observed.last() != Some(&heartbeat.cycle) {
                observed.push(heartbeat.cycle);
            }
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    assert!(observed.len() >= 2, "too few heartbeats observed");
    assert!(
        observed.windows(2).all(|pair| pair[0] < pair[1]),
        "cycle counter regressed: {observed:?}"
    );

    harness.orchestrator.stop(&[BINDING], None).await;
    assert!(drained(&harness, 5_000).await);
}
