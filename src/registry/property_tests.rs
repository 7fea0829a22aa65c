//! Property-based tests for the worker registry.
//!
//! These tests verify the coordination invariants the rest of the daemon
//! leans on:
//! - the lock has at most one live holder at any instant
//! - owner-guarded state writes never fire for non-holders
//! - command sequence numbers are strictly monotonic and FIFO-ordered
//!
//! Run with:
//! ```bash
//! cargo test --lib registry::property_tests
//! ```

use proptest::prelude::*;
use std::collections::HashSet;
use tempfile::TempDir;

use super::store::Registry;
use super::types::{BindingId, CommandKind, WorkerState};

// ============================================================================
// Test Strategies - Input Generation
// ============================================================================

/// Strategy for generating owner tokens (host:pid:nonce shaped).
fn owner_token() -> impl Strategy<Value = String> {
    ("[a-z]{2,8}", 1u32..9999, "[0-9a-f]{8}")
        .prop_map(|(host, pid, nonce)| format!("{host}:{pid}:{nonce}"))
}

/// Strategy for a small pool of distinct owners contending for one lock.
fn owner_pool() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set(owner_token(), 2..6)
        .prop_map(|set| set.into_iter().collect::<Vec<_>>())
}

/// Strategy for a sequence of command kinds.
fn command_kinds() -> impl Strategy<Value = Vec<CommandKind>> {
    prop::collection::vec(
        prop_oneof![
            Just(CommandKind::Start),
            Just(CommandKind::Pause { reason: None }),
            Just(CommandKind::Resume),
            Just(CommandKind::Stop { reason: None }),
        ],
        1..20,
    )
}

// ============================================================================
// Lock Invariants
// ============================================================================

proptest! {
    /// Invariant: with a non-expiring TTL, exactly one contender out of any
    /// pool wins the lock, and every loser's refresh/release is a no-op.
    #[test]
    fn lock_has_single_holder(owners in owner_pool(), binding in 1u64..1000) {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::open(tmp.path().join("registry.redb")).unwrap();
        let id = BindingId(binding);

        let mut winners = Vec::new();
        for owner in &owners {
            if registry.acquire_lock(id, owner, 600_000).unwrap() {
                winners.push(owner.clone());
            }
        }
        prop_assert_eq!(winners.len(), 1, "exactly one acquire may succeed");
        let winner = &winners[0];
        prop_assert_eq!(&registry.get_lock(id).unwrap().unwrap().owner, winner);

        for owner in &owners {
            if owner == winner {
                continue;
            }
            prop_assert!(!registry.refresh_lock(id, owner, 600_000).unwrap());
            prop_assert!(!registry.release_lock(id, owner).unwrap());
            prop_assert_eq!(&registry.get_lock(id).unwrap().unwrap().owner, winner);
        }
    }

    /// Invariant: after an owner-checked release, the lock is free and any
    /// contender may claim it.
    #[test]
    fn released_lock_is_reacquirable(first in owner_token(), second in owner_token()) {
        prop_assume!(first != second);
        let tmp = TempDir::new().unwrap();
        let registry = Registry::open(tmp.path().join("registry.redb")).unwrap();
        let id = BindingId(1);

        prop_assert!(registry.acquire_lock(id, &first, 600_000).unwrap());
        prop_assert!(registry.release_lock(id, &first).unwrap());
        prop_assert!(registry.acquire_lock(id, &second, 600_000).unwrap());
        prop_assert_eq!(registry.get_lock(id).unwrap().unwrap().owner, second);
    }

    /// Invariant: an owner-guarded state write from a non-holder returns
    /// false and leaves the record untouched.
    #[test]
    fn foreign_set_state_is_a_noop(holder in owner_token(), intruder in owner_token()) {
        prop_assume!(holder != intruder);
        let tmp = TempDir::new().unwrap();
        let registry = Registry::open(tmp.path().join("registry.redb")).unwrap();
        let id = BindingId(1);

        prop_assert!(registry.acquire_lock(id, &holder, 600_000).unwrap());
        prop_assert!(registry.set_state(id, &holder, WorkerState::Running, None).unwrap());

        prop_assert!(!registry
            .set_state(id, &intruder, WorkerState::Stopped, Some("takeover"))
            .unwrap());

        let record = registry.get_state(id).unwrap().unwrap();
        prop_assert_eq!(record.state, WorkerState::Running);
        prop_assert_eq!(record.owner.as_deref(), Some(holder.as_str()));
    }
}

// ============================================================================
// Command Queue Invariants
// ============================================================================

proptest! {
    /// Invariant: drained commands come back in enqueue order with strictly
    /// increasing, never-reused sequence numbers.
    #[test]
    fn commands_preserve_order_and_seq(kinds in command_kinds()) {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::open(tmp.path().join("registry.redb")).unwrap();
        let id = BindingId(1);

        let mut assigned = Vec::new();
        for kind in &kinds {
            assigned.push(registry.enqueue_command(id, kind.clone()).unwrap());
        }

        let drained = registry.drain_commands(id).unwrap();
        prop_assert_eq!(drained.len(), kinds.len());
        for (command, kind) in drained.iter().zip(&kinds) {
            prop_assert_eq!(&command.kind, kind);
        }
        let seqs: Vec<u64> = drained.iter().map(|command| command.seq).collect();
        prop_assert_eq!(&seqs, &assigned);
        prop_assert!(seqs.windows(2).all(|pair| pair[0] < pair[1]));

        // A second batch continues the sequence instead of restarting it.
        let next = registry.enqueue_command(id, CommandKind::Resume).unwrap();
        prop_assert_eq!(next, kinds.len() as u64);
    }

    /// Invariant: sequence numbers are unique across interleaved
    /// enqueue/drain rounds.
    #[test]
    fn seq_numbers_never_repeat(rounds in prop::collection::vec(1usize..5, 1..6)) {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::open(tmp.path().join("registry.redb")).unwrap();
        let id = BindingId(1);

        let mut seen = HashSet::new();
        for batch in rounds {
            for _ in 0..batch {
                registry.enqueue_command(id, CommandKind::Start).unwrap();
            }
            for command in registry.drain_commands(id).unwrap() {
                prop_assert!(seen.insert(command.seq), "seq {} repeated", command.seq);
            }
        }
    }
}
