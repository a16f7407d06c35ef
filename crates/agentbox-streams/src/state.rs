//! Per-container state pushed up by container agents.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Small key-value state per container (`worktrees` most notably).
///
/// Entries are overwritten key by key on `state_update` events and the whole
/// record is dropped when the container disconnects. The completions handler
/// is the only reader; nothing else depends on the shape of the values.
#[derive(Debug, Default)]
pub struct ContainerStateStore {
    state: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl ContainerStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the payload's top-level keys into the container's record.
    pub fn update(&self, container: &str, payload: &Value) {
        let Some(object) = payload.as_object() else {
            return;
        };

        let mut state = self.state.lock().expect("state lock poisoned");
        let record = state.entry(container.to_string()).or_default();
        for (key, value) in object {
            record.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, container: &str, key: &str) -> Option<Value> {
        self.state
            .lock()
            .expect("state lock poisoned")
            .get(container)
            .and_then(|record| record.get(key))
            .cloned()
    }

    /// Worktree branch names for one container.
    pub fn worktrees(&self, container: &str) -> Vec<String> {
        self.get(container, "worktrees")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Worktrees across all containers matching the filter.
    pub fn all_worktrees<F: Fn(&str) -> bool>(&self, filter: F) -> Vec<String> {
        let state = self.state.lock().expect("state lock poisoned");
        let mut out = Vec::new();
        for (container, record) in state.iter() {
            if !filter(container) {
                continue;
            }
            if let Some(list) = record.get("worktrees") {
                if let Ok(branches) = serde_json::from_value::<Vec<String>>(list.clone()) {
                    out.extend(branches);
                }
            }
        }
        out
    }

    /// Drop a container's whole record.
    pub fn clear(&self, container: &str) {
        self.state
            .lock()
            .expect("state lock poisoned")
            .remove(container);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_overwrites_single_keys() {
        let store = ContainerStateStore::new();
        store.update("web", &json!({"worktrees": ["main"], "other": 1}));
        store.update("web", &json!({"worktrees": ["main", "feature"]}));

        assert_eq!(store.worktrees("web"), vec!["main", "feature"]);
        assert_eq!(store.get("web", "other"), Some(json!(1)));
    }

    #[test]
    fn non_object_payloads_are_ignored() {
        let store = ContainerStateStore::new();
        store.update("web", &json!("not an object"));
        assert!(store.get("web", "worktrees").is_none());
    }

    #[test]
    fn clear_drops_the_record() {
        let store = ContainerStateStore::new();
        store.update("web", &json!({"worktrees": ["main"]}));
        store.clear("web");

        assert!(store.worktrees("web").is_empty());
    }

    #[test]
    fn all_worktrees_respects_the_filter() {
        let store = ContainerStateStore::new();
        store.update("agentbox-web", &json!({"worktrees": ["main"]}));
        store.update("postgres", &json!({"worktrees": ["ignored"]}));

        let branches = store.all_worktrees(|name| name.starts_with("agentbox-"));
        assert_eq!(branches, vec!["main"]);
    }
}
