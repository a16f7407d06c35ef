//! Correlation-ID waiters.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

/// Pending request waiters keyed by correlation ID.
///
/// Every pending request has exactly one producer (the waiter) and at most
/// one completer: the first response carrying a matching ID. Dropping the
/// map's senders (on transport close) fails every waiter.
#[derive(Debug, Default)]
pub struct PendingRequests {
    waiters: Mutex<HashMap<String, oneshot::Sender<Value>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id` and return its receiving half.
    pub fn register(&self, id: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .expect("pending lock poisoned")
            .insert(id.to_string(), tx);
        rx
    }

    /// Hand a response payload to the matching waiter.
    ///
    /// Returns false when no waiter exists (late or unsolicited response);
    /// the payload is dropped in that case.
    pub fn complete(&self, id: &str, payload: Value) -> bool {
        let waiter = self
            .waiters
            .lock()
            .expect("pending lock poisoned")
            .remove(id);
        match waiter {
            Some(tx) => tx.send(payload).is_ok(),
            None => {
                debug!(id = %id, "dropping response with no matching waiter");
                false
            }
        }
    }

    /// Remove a waiter whose deadline fired. A response arriving later is
    /// dropped silently by [`PendingRequests::complete`].
    pub fn discard(&self, id: &str) {
        self.waiters
            .lock()
            .expect("pending lock poisoned")
            .remove(id);
    }

    /// Fail every waiter by dropping its sender (receivers observe a closed
    /// channel, which callers report as transport-closed).
    pub fn fail_all(&self) {
        self.waiters
            .lock()
            .expect("pending lock poisoned")
            .clear();
    }

    /// Number of requests currently in flight.
    pub fn len(&self) -> usize {
        self.waiters.lock().expect("pending lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn completes_the_matching_waiter() {
        let pending = PendingRequests::new();
        let rx = pending.register("aa");
        let _other = pending.register("bb");

        assert!(pending.complete("aa", json!({"ok": true})));
        let payload = rx.await.unwrap();
        assert_eq!(payload["ok"], true);
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn unmatched_response_is_dropped() {
        let pending = PendingRequests::new();
        assert!(!pending.complete("nope", json!({})));
    }

    #[tokio::test]
    async fn at_most_one_completion_per_waiter() {
        let pending = PendingRequests::new();
        let rx = pending.register("aa");

        assert!(pending.complete("aa", json!({"n": 1})));
        assert!(!pending.complete("aa", json!({"n": 2})));

        assert_eq!(rx.await.unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn discarded_waiter_drops_late_response() {
        let pending = PendingRequests::new();
        let rx = pending.register("aa");

        pending.discard("aa");
        assert!(!pending.complete("aa", json!({})));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn fail_all_closes_every_receiver() {
        let pending = PendingRequests::new();
        let rx1 = pending.register("aa");
        let rx2 = pending.register("bb");

        pending.fail_all();

        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
        assert!(pending.is_empty());
    }
}
