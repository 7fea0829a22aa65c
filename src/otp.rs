//! Per-binding OTP rendezvous.
//!
//! A single-slot mailbox pairs the user-facing OTP ingress with the worker
//! waiting inside a cycle. The worker subscribes before publishing
//! `otp_status = PENDING`, so a submission can never fall into a gap; the
//! ingress rejects a second OTP while one is already delivered and rejects
//! submissions when no worker is waiting.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::registry::BindingId;

/// Outcome of an OTP submission, reported back to the ingress caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// An OTP was already delivered for the in-flight wait.
    AlreadyPending,
    /// No worker is currently waiting on this binding.
    NoWaiter,
}

impl SubmitOutcome {
    pub fn reason(self) -> Option<&'static str> {
        match self {
            Self::Accepted => None,
            Self::AlreadyPending => Some("otp_already_pending"),
            Self::NoWaiter => Some("no_waiter"),
        }
    }
}

enum Slot {
    Waiting(oneshot::Sender<String>),
    Delivered,
}

/// Shared mailbox map, one slot per binding.
#[derive(Clone, Default)]
pub struct OtpMailbox {
    slots: Arc<Mutex<HashMap<BindingId, Slot>>>,
}

/// A worker's registration for one OTP wait. Dropping it clears the slot.
pub struct OtpTicket {
    binding_id: BindingId,
    slots: Arc<Mutex<HashMap<BindingId, Slot>>>,
    receiver: oneshot::Receiver<String>,
}

impl OtpMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the worker as the waiter for `binding_id`.
    ///
    /// Replaces any stale slot from a previous cycle.
    pub fn subscribe(&self, binding_id: BindingId) -> OtpTicket {
        let (sender, receiver) = oneshot::channel();
        self.slots.lock().insert(binding_id, Slot::Waiting(sender));
        OtpTicket {
            binding_id,
            slots: Arc::clone(&self.slots),
            receiver,
        }
    }

    /// Deliver a user-supplied OTP to the waiting worker.
    pub fn submit(&self, binding_id: BindingId, otp: String) -> SubmitOutcome {
        let mut slots = self.slots.lock();
        match slots.get(&binding_id) {
            Some(Slot::Delivered) => SubmitOutcome::AlreadyPending,
            Some(Slot::Waiting(_)) => {
                let Some(Slot::Waiting(sender)) = slots.insert(binding_id, Slot::Delivered)
                else {
                    return SubmitOutcome::NoWaiter;
                };
                if sender.send(otp).is_ok() {
                    SubmitOutcome::Accepted
                } else {
                    // The worker gave up between our check and the send.
                    slots.remove(&binding_id);
                    SubmitOutcome::NoWaiter
                }
            }
            None => SubmitOutcome::NoWaiter,
        }
    }
}

impl OtpTicket {
    /// Wait for an OTP, up to `timeout`. Returns `None` on timeout or if the
    /// mailbox was torn down.
    pub async fn wait(mut self, timeout: Duration) -> Option<String> {
        let result = tokio::time::timeout(timeout, &mut self.receiver).await;
        match result {
            Ok(Ok(otp)) => Some(otp),
            Ok(Err(_)) | Err(_) => None,
        }
    }
}

impl Drop for OtpTicket {
    fn drop(&mut self) {
        self.slots.lock().remove(&self.binding_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_without_waiter_is_rejected() {
        let mailbox = OtpMailbox::new();
        let outcome = mailbox.submit(BindingId(1), "123456".to_string());
        assert_eq!(outcome, SubmitOutcome::NoWaiter);
        assert_eq!(outcome.reason(), Some("no_waiter"));
    }

    #[tokio::test]
    async fn test_rendezvous_delivers_otp() {
        let mailbox = OtpMailbox::new();
        let ticket = mailbox.subscribe(BindingId(1));

        assert_eq!(
            mailbox.submit(BindingId(1), "123456".to_string()),
            SubmitOutcome::Accepted
        );
        let otp = ticket.wait(Duration::from_millis(100)).await;
        assert_eq!(otp.as_deref(), Some("123456"));
    }

    #[tokio::test]
    async fn test_second_submit_rejected_while_pending() {
        let mailbox = OtpMailbox::new();
        let ticket = mailbox.subscribe(BindingId(1));

        assert_eq!(
            mailbox.submit(BindingId(1), "111111".to_string()),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            mailbox.submit(BindingId(1), "222222".to_string()),
            SubmitOutcome::AlreadyPending
        );

        // The first submission wins.
        let otp = ticket.wait(Duration::from_millis(100)).await;
        assert_eq!(otp.as_deref(), Some("111111"));
    }

    #[tokio::test]
    async fn test_wait_times_out_and_clears_slot() {
        let mailbox = OtpMailbox::new();
        let ticket = mailbox.subscribe(BindingId(1));

        let otp = ticket.wait(Duration::from_millis(20)).await;
        assert!(otp.is_none());

        // Slot is gone: a late submission is rejected, not queued.
        assert_eq!(
            mailbox.submit(BindingId(1), "123456".to_string()),
            SubmitOutcome::NoWaiter
        );
    }

    #[tokio::test]
    async fn test_bindings_have_independent_slots() {
        let mailbox = OtpMailbox::new();
        let first = mailbox.subscribe(BindingId(1));
        let second = mailbox.subscribe(BindingId(2));

        assert_eq!(
            mailbox.submit(BindingId(2), "222222".to_string()),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            second.wait(Duration::from_millis(100)).await.as_deref(),
            Some("222222")
        );
        assert!(first.wait(Duration::from_millis(20)).await.is_none());
    }
}
