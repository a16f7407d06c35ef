//! In-memory session-stream state: the per-(container, session) snapshot
//! cache, the subscriber fan-out, and the small per-container state store
//! pushed up by container agents.

mod cache;
mod state;
mod subscribers;

pub use cache::{StreamCache, StreamSnapshot};
pub use state::ContainerStateStore;
pub use subscribers::{SubscriberHub, SubscriberId, SubscriptionReceiver};

use std::sync::Arc;

/// Facade tying the cache and the subscriber hub together.
///
/// Mutations go through here so the ordering discipline holds: the cache is
/// updated first, then subscribers are notified with the snapshot that was
/// written. Disconnect cleanup takes the cache lock before the subscriber
/// lock; that acquisition order is canonical and must not be inverted.
#[derive(Clone, Default)]
pub struct StreamHub {
    cache: Arc<StreamCache>,
    subscribers: Arc<SubscriberHub>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure the container's namespace exists (stream_register).
    pub fn register(&self, container: &str, session: &str) {
        self.cache.ensure_container(container);
        tracing::debug!(container = %container, session = %session, "stream registered");
    }

    /// Replace the snapshot and fan it out to subscribers (stream_data).
    pub fn apply_data(&self, container: &str, session: &str, snapshot: StreamSnapshot) {
        self.cache.insert(container, session, snapshot.clone());
        self.subscribers.publish(container, session, snapshot);
    }

    /// Drop one session's snapshot (stream_unregister).
    pub fn unregister(&self, container: &str, session: &str) {
        self.cache.remove(container, session);
        tracing::debug!(container = %container, session = %session, "stream unregistered");
    }

    /// Drop every stream and subscriber belonging to a container.
    pub fn purge_container(&self, container: &str) {
        self.cache.remove_container(container);
        self.subscribers.remove_container(container);
    }

    pub fn snapshot(&self, container: &str, session: &str) -> Option<StreamSnapshot> {
        self.cache.get(container, session)
    }

    /// Cached buffer bytes for a session, if any.
    pub fn buffer(&self, container: &str, session: &str) -> Option<String> {
        self.cache.get(container, session).map(|s| s.buffer)
    }

    /// Session names cached for one container.
    pub fn sessions(&self, container: &str) -> Vec<String> {
        self.cache.sessions(container)
    }

    /// All (container, session) pairs currently cached.
    pub fn all_sessions(&self) -> Vec<(String, String)> {
        self.cache.all_sessions()
    }

    pub fn subscribe(&self, container: &str, session: &str) -> (SubscriberId, SubscriptionReceiver) {
        self.subscribers.subscribe(container, session)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.unsubscribe(id);
    }

    /// Number of subscribers currently registered for a key.
    pub fn subscriber_count(&self, container: &str, session: &str) -> usize {
        self.subscribers.count(container, session)
    }
}
