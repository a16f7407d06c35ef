//! Subscriber fan-out for stream updates.

use crate::StreamSnapshot;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of each subscriber's delivery channel. A subscriber that falls
/// further behind than this loses updates rather than blocking the producer.
const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Receiving half handed to the subscriber.
pub type SubscriptionReceiver = mpsc::Receiver<StreamSnapshot>;

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<StreamSnapshot>,
}

/// Subscribers keyed by `(container, session)`.
///
/// The list is mutated only under the subscriber lock; fan-out clones the
/// senders out of the lock first, so a slow consumer never extends the
/// critical section. Delivery uses `try_send`: a full or closed channel
/// drops that update for that subscriber (logged) and the rest still
/// receive it. Dead subscribers are removed only by explicit unsubscribe.
#[derive(Default)]
pub struct SubscriberHub {
    subscribers: Mutex<HashMap<(String, String), Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for a key. The stream need not exist yet; a
    /// subscriber may outlive the stream and vice versa.
    pub fn subscribe(&self, container: &str, session: &str) -> (SubscriberId, SubscriptionReceiver) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);

        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .entry((container.to_string(), session.to_string()))
            .or_default()
            .push(Subscriber { id, tx });

        (id, rx)
    }

    /// Remove one subscription; the key disappears when its list empties.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut map = self.subscribers.lock().expect("subscriber lock poisoned");
        map.retain(|_, list| {
            list.retain(|s| s.id != id);
            !list.is_empty()
        });
    }

    /// Deliver a snapshot to every subscriber of the key.
    pub fn publish(&self, container: &str, session: &str, snapshot: StreamSnapshot) {
        let senders: Vec<(SubscriberId, mpsc::Sender<StreamSnapshot>)> = {
            let map = self.subscribers.lock().expect("subscriber lock poisoned");
            match map.get(&(container.to_string(), session.to_string())) {
                Some(list) => list.iter().map(|s| (s.id, s.tx.clone())).collect(),
                None => return,
            }
        };

        for (id, tx) in senders {
            if let Err(e) = tx.try_send(snapshot.clone()) {
                debug!(
                    container = %container,
                    session = %session,
                    subscriber = ?id,
                    error = %e,
                    "dropping stream update for subscriber"
                );
            }
        }
    }

    /// Drop every subscriber whose key belongs to the container.
    pub fn remove_container(&self, container: &str) {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .retain(|(c, _), _| c != container);
    }

    pub fn count(&self, container: &str, session: &str) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .get(&(container.to_string(), session.to_string()))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Total number of keys with at least one subscriber.
    pub fn key_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .len()
    }
}
