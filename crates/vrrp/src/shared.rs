//! State shared between the state machine and the ARP responder.
//!
//! Only the state machine writes the state. Readers may see a transition
//! up to one scheduling quantum late; the worst outcome is one extra or
//! missing ARP reply around a role change, which the protocol tolerates.

use crate::types::VRRPState;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::sync::Notify;

#[derive(Debug)]
pub struct SharedState {
    state: AtomicU8,
    shutdown: AtomicBool,
    changed: Notify,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(VRRPState::Init as u8),
            shutdown: AtomicBool::new(false),
            changed: Notify::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> VRRPState {
        VRRPState::from_repr(self.state.load(Ordering::Acquire))
    }

    /// Publish a transition and wake every waiter.
    pub(crate) fn set_state(&self, state: VRRPState) {
        self.state.store(state as u8, Ordering::Release);
        self.changed.notify_waiters();
    }

    /// Wait until `pred` holds for the current state, without spinning.
    pub async fn wait_until<F>(&self, pred: F) -> VRRPState
    where
        F: Fn(VRRPState) -> bool,
    {
        loop {
            // Registered before the check so a concurrent set_state is not lost.
            let notified = self.changed.notified();
            let state = self.state();
            if pred(state) {
                return state;
            }
            notified.await;
        }
    }

    /// Ask the state machine to shut down at its next iteration.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.changed.notify_waiters();
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_until_wakes_on_transition() {
        let shared = Arc::new(SharedState::new());
        let waiter = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move { shared.wait_until(|s| s == VRRPState::Master).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        shared.set_state(VRRPState::Backup);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        shared.set_state(VRRPState::Master);
        let state = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter was not woken")
            .unwrap();
        assert_eq!(state, VRRPState::Master);
    }

    #[tokio::test]
    async fn test_wait_until_returns_immediately_when_satisfied() {
        let shared = SharedState::new();
        shared.set_state(VRRPState::Master);
        assert_eq!(
            shared.wait_until(|s| s == VRRPState::Master).await,
            VRRPState::Master
        );
    }

    #[test]
    fn test_shutdown_flag() {
        let shared = SharedState::new();
        assert!(!shared.shutdown_requested());
        shared.request_shutdown();
        assert!(shared.shutdown_requested());
        assert_eq!(shared.state(), VRRPState::Init);
    }
}
