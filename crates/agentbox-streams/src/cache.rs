//! Last-buffer snapshot cache.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

/// One terminal pane snapshot as pushed by a container agent.
///
/// The buffer bytes are opaque to the daemon: ANSI parsing and cursor
/// rendering are the subscriber's problem. That keeps replacement O(1).
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub buffer: String,
    pub cursor_x: u32,
    pub cursor_y: u32,
    pub pane_width: u32,
    pub pane_height: u32,
    pub updated_at: DateTime<Utc>,
}

impl StreamSnapshot {
    pub fn new(buffer: String, cursor_x: u32, cursor_y: u32, pane_width: u32, pane_height: u32) -> Self {
        Self {
            buffer,
            cursor_x,
            cursor_y,
            pane_width,
            pane_height,
            updated_at: Utc::now(),
        }
    }
}

/// Keyed map `(container, session) -> StreamSnapshot`.
///
/// The cache never merges: the latest `stream_data` completely supersedes
/// the prior snapshot. Readers take a consistent copy under the shared lock.
#[derive(Debug, Default)]
pub struct StreamCache {
    sessions: RwLock<HashMap<String, HashMap<String, StreamSnapshot>>>,
}

impl StreamCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure the container's namespace exists.
    pub fn ensure_container(&self, container: &str) {
        self.sessions
            .write()
            .expect("stream lock poisoned")
            .entry(container.to_string())
            .or_default();
    }

    /// Replace the snapshot for a session, creating the namespace if the
    /// registration event was never observed.
    pub fn insert(&self, container: &str, session: &str, snapshot: StreamSnapshot) {
        self.sessions
            .write()
            .expect("stream lock poisoned")
            .entry(container.to_string())
            .or_default()
            .insert(session.to_string(), snapshot);
    }

    pub fn get(&self, container: &str, session: &str) -> Option<StreamSnapshot> {
        self.sessions
            .read()
            .expect("stream lock poisoned")
            .get(container)
            .and_then(|sessions| sessions.get(session))
            .cloned()
    }

    pub fn remove(&self, container: &str, session: &str) {
        if let Some(sessions) = self
            .sessions
            .write()
            .expect("stream lock poisoned")
            .get_mut(container)
        {
            sessions.remove(session);
        }
    }

    /// Drop every session belonging to a container.
    pub fn remove_container(&self, container: &str) {
        self.sessions
            .write()
            .expect("stream lock poisoned")
            .remove(container);
    }

    pub fn sessions(&self, container: &str) -> Vec<String> {
        self.sessions
            .read()
            .expect("stream lock poisoned")
            .get(container)
            .map(|sessions| sessions.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_sessions(&self) -> Vec<(String, String)> {
        self.sessions
            .read()
            .expect("stream lock poisoned")
            .iter()
            .flat_map(|(container, sessions)| {
                sessions
                    .keys()
                    .map(|s| (container.clone(), s.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(data: &str) -> StreamSnapshot {
        StreamSnapshot::new(data.to_string(), 0, 0, 80, 24)
    }

    #[test]
    fn read_returns_exactly_the_last_write() {
        let cache = StreamCache::new();
        cache.insert("web", "main", snap("one"));
        cache.insert("web", "main", snap("two"));

        assert_eq!(cache.get("web", "main").unwrap().buffer, "two");
    }

    #[test]
    fn ensure_container_creates_empty_namespace() {
        let cache = StreamCache::new();
        cache.ensure_container("web");
        assert!(cache.sessions("web").is_empty());
        assert!(cache.get("web", "main").is_none());
    }

    #[test]
    fn remove_container_purges_all_sessions() {
        let cache = StreamCache::new();
        cache.insert("web", "main", snap("a"));
        cache.insert("web", "aux", snap("b"));

        cache.remove_container("web");

        assert!(cache.get("web", "main").is_none());
        assert!(cache.all_sessions().is_empty());
    }

    #[test]
    fn lists_sessions_across_containers() {
        let cache = StreamCache::new();
        cache.insert("web", "main", snap("a"));
        cache.insert("api", "main", snap("b"));

        let mut all = cache.all_sessions();
        all.sort();
        assert_eq!(
            all,
            vec![
                ("api".to_string(), "main".to_string()),
                ("web".to_string(), "main".to_string()),
            ]
        );
    }
}
