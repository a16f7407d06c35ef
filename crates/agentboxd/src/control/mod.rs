//! Control-channel handlers: what containers may ask of the daemon, and the
//! events they push. Registered once at startup; connection lifecycle is
//! delivered through [`LifecycleCleanup`], not wire selectors.

use crate::app::{DaemonState, CONTAINER_REQUEST_TIMEOUT};
use crate::external::{clipboard, notifier};
use crate::ipc::handlers::completions;
use agentbox_control::{HandlerRegistry, HandlerRegistryBuilder};
use agentbox_ipc::err_response;
use agentbox_streams::StreamSnapshot;
use agentbox_tunnel::ConnectionObserver;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Build the fixed handler registry for container connections.
pub fn build_registry(state: DaemonState) -> HandlerRegistry {
    let builder = HandlerRegistry::builder();
    let builder = register_requests(builder, state.clone());
    register_events(builder, state).build()
}

fn register_requests(builder: HandlerRegistryBuilder, state: DaemonState) -> HandlerRegistryBuilder {
    let notify_state = state.clone();
    let completions_state = state.clone();
    let port_add_state = state.clone();
    let port_remove_state = state;

    builder
        .request("notify", move |_container, payload| {
            let state = notify_state.clone();
            async move {
                let title = str_field(&payload, "title", "Agentbox");
                let message = str_field(&payload, "message", "Notification");
                let urgency = str_field(&payload, "urgency", "normal");
                notifier::notify(&state.config, &title, &message, &urgency).await
            }
        })
        .request("clipboard_set", |_container, payload| async move {
            let data = str_field(&payload, "data", "");
            let selection = str_field(&payload, "selection", "clipboard");
            clipboard::set_clipboard(&data, &selection).await
        })
        .request("get_completions", move |_container, payload| {
            let state = completions_state.clone();
            async move {
                let data = completions::completions(&state, &payload).await;
                json!({"ok": true, "data": data})
            }
        })
        .request("port_add", move |container, payload| {
            let state = port_add_state.clone();
            async move { handle_port_add(&state, &container, &payload) }
        })
        .request("port_remove", move |container, payload| {
            let state = port_remove_state.clone();
            async move { handle_port_remove(&state, &container, &payload).await }
        })
        .request("ping", |_container, _payload| async { json!({"ok": true}) })
}

fn register_events(builder: HandlerRegistryBuilder, state: DaemonState) -> HandlerRegistryBuilder {
    let register_state = state.clone();
    let data_state = state.clone();
    let unregister_state = state.clone();
    let update_state = state.clone();
    let removed_state = state;

    builder
        .event("stream_register", move |container, payload| {
            let state = register_state.clone();
            async move {
                let session = str_field(&payload, "session", "unknown");
                state.streams.register(&container, &session);
            }
        })
        .event("stream_data", move |container, payload| {
            let state = data_state.clone();
            async move {
                let session = str_field(&payload, "session", "unknown");
                let snapshot = StreamSnapshot::new(
                    str_field(&payload, "data", ""),
                    u32_field(&payload, "cursor_x", 0),
                    u32_field(&payload, "cursor_y", 0),
                    u32_field(&payload, "pane_width", 80),
                    u32_field(&payload, "pane_height", 24),
                );
                state.streams.apply_data(&container, &session, snapshot);
            }
        })
        .event("stream_unregister", move |container, payload| {
            let state = unregister_state.clone();
            async move {
                let session = str_field(&payload, "session", "unknown");
                state.streams.unregister(&container, &session);
            }
        })
        .event("state_update", move |container, payload| {
            let state = update_state.clone();
            async move {
                state.container_state.update(&container, &payload);
                debug!(container = %container, "container state updated");
            }
        })
        .event("forward_removed", move |container, payload| {
            let state = removed_state.clone();
            async move { handle_forward_removed(&state, &container, &payload) }
        })
}

/// A container announces an upcoming forward. For the local direction this
/// claims the allow-set entry; for the remote direction it records the
/// intent consumed by the tcpip-forward request that follows.
fn handle_port_add(state: &DaemonState, container: &str, payload: &Value) -> Value {
    let direction = str_field(payload, "direction", "");
    let Some(host_port) = port_field(payload, "host_port") else {
        return err_response("missing required fields: direction, host_port");
    };
    let container_port = port_field(payload, "container_port").unwrap_or(host_port);
    let name = str_field(payload, "name", &format!("dynamic-{host_port}"));

    match direction.as_str() {
        "remote" => {
            info!(
                container = %container,
                host_port,
                container_port,
                "container requesting remote forward"
            );
            match state
                .tunnel
                .note_remote_intent(container, host_port, container_port, &name)
            {
                Ok(()) => json!({
                    "ok": true,
                    "data": {"host_port": host_port, "container_port": container_port},
                }),
                Err(e) => err_response(e),
            }
        }
        "local" => {
            info!(
                container = %container,
                host_port,
                container_port,
                "container requesting local forward"
            );
            match state
                .tunnel
                .install_local_forward(container, host_port, container_port, &name)
            {
                Ok(()) => json!({"ok": true}),
                Err(e) => err_response(e),
            }
        }
        other => err_response(format!("unknown forward direction: {other}")),
    }
}

async fn handle_port_remove(state: &DaemonState, container: &str, payload: &Value) -> Value {
    let direction = str_field(payload, "direction", "");
    let Some(host_port) = port_field(payload, "host_port") else {
        return err_response("missing required fields: direction, host_port");
    };

    match direction.as_str() {
        "local" => {
            state.tunnel.remove_local_forward(container, host_port);
            json!({"ok": true})
        }
        // The forward itself is cancelled by the container through the SSH
        // protocol; ask it to do so and mirror the answer.
        "remote" => {
            let payload = json!({"direction": "remote", "host_port": host_port});
            match state
                .tunnel
                .request(container, "port_remove", payload, CONTAINER_REQUEST_TIMEOUT)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(container = %container, host_port, error = %e, "remote removal failed");
                    err_response("failed to communicate with container")
                }
            }
        }
        other => err_response(format!("unknown forward direction: {other}")),
    }
}

/// The container tore a forward down on its side; drop the daemon's record
/// (and, for local forwards, the allow-set claim) so nothing leaks.
fn handle_forward_removed(state: &DaemonState, container: &str, payload: &Value) {
    let direction = str_field(payload, "direction", "");
    let Some(host_port) = port_field(payload, "host_port") else {
        return;
    };

    match direction.as_str() {
        "local" => {
            state.tunnel.remove_local_forward(container, host_port);
            debug!(container = %container, host_port, "local forward tracking removed");
        }
        "remote" => {
            let _ = state.tunnel.remove_remote_forward(container, host_port);
            debug!(container = %container, host_port, "remote forward tracking removed");
        }
        _ => {}
    }
}

/// Cleans daemon-wide state when a connection appears or dies. The tunnel
/// removes the connection entry and its forwards before calling in here;
/// streams are purged next, then subscribers, then container state.
pub struct LifecycleCleanup {
    state: DaemonState,
}

impl LifecycleCleanup {
    pub fn new(state: DaemonState) -> Self {
        Self { state }
    }
}

impl ConnectionObserver for LifecycleCleanup {
    fn container_connected(&self, container: &str) {
        info!(container = %container, "SSH tunnel: container connected");
    }

    fn container_disconnected(&self, container: &str) {
        info!(container = %container, "SSH tunnel: container disconnected");
        self.state.streams.purge_container(container);
        self.state.container_state.clear(container);
    }
}

fn str_field(payload: &Value, key: &str, default: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn u32_field(payload: &Value, key: &str, default: u32) -> u32 {
    payload
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(default)
}

fn port_field(payload: &Value, key: &str) -> Option<u16> {
    payload
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u16::try_from(v).ok())
        .filter(|p| *p > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbox_core::{Config, Paths};
    use agentbox_streams::{ContainerStateStore, StreamHub};
    use agentbox_tunnel::{BindAddresses, TunnelServer};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_state(dir: &tempfile::TempDir) -> DaemonState {
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let bind = Arc::new(BindAddresses::new(vec!["127.0.0.1".to_string()]));
        let tunnel = TunnelServer::new(paths.ssh_socket(), bind);
        DaemonState {
            config: Arc::new(Config::default()),
            paths: Arc::new(paths),
            tunnel,
            streams: StreamHub::new(),
            container_state: Arc::new(ContainerStateStore::new()),
        }
    }

    #[tokio::test]
    async fn stream_events_flow_into_the_hub() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);
        let registry = build_registry(state.clone());

        let register = registry.event_handler("stream_register").unwrap();
        register(
            "agentbox-web".to_string(),
            json!({"session": "main"}),
        )
        .await;

        let data = registry.event_handler("stream_data").unwrap();
        data(
            "agentbox-web".to_string(),
            json!({
                "session": "main",
                "data": "hello",
                "cursor_x": 5,
                "cursor_y": 0,
                "pane_width": 80,
                "pane_height": 24,
            }),
        )
        .await;

        let snapshot = state.streams.snapshot("agentbox-web", "main").unwrap();
        assert_eq!(snapshot.buffer, "hello");
        assert_eq!(snapshot.cursor_x, 5);
        assert_eq!(snapshot.pane_height, 24);

        let unregister = registry.event_handler("stream_unregister").unwrap();
        unregister("agentbox-web".to_string(), json!({"session": "main"})).await;
        assert!(state.streams.snapshot("agentbox-web", "main").is_none());
    }

    #[tokio::test]
    async fn state_update_events_land_in_the_store() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);
        let registry = build_registry(state.clone());

        let update = registry.event_handler("state_update").unwrap();
        update(
            "agentbox-web".to_string(),
            json!({"worktrees": ["main", "wip"]}),
        )
        .await;

        assert_eq!(state.container_state.worktrees("agentbox-web"), vec!["main", "wip"]);
    }

    #[tokio::test]
    async fn ping_answers_ok() {
        let dir = tempdir().unwrap();
        let registry = build_registry(test_state(&dir));

        let ping = registry.request_handler("ping").unwrap();
        let response = ping("agentbox-web".to_string(), json!({})).await;
        assert_eq!(response, json!({"ok": true}));
    }

    #[tokio::test]
    async fn port_add_without_fields_is_invalid() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);

        let response = handle_port_add(&state, "agentbox-web", &json!({"direction": "local"}));
        assert_eq!(response["ok"], false);
    }

    #[tokio::test]
    async fn port_add_local_to_unknown_container_fails() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);

        let response = handle_port_add(
            &state,
            "agentbox-web",
            &json!({"direction": "local", "host_port": 5000}),
        );
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"], "container agentbox-web not connected");
    }

    #[tokio::test]
    async fn lifecycle_cleanup_purges_streams_and_state() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);
        state.streams.apply_data(
            "agentbox-web",
            "main",
            StreamSnapshot::new("x".to_string(), 0, 0, 80, 24),
        );
        state
            .container_state
            .update("agentbox-web", &json!({"worktrees": ["main"]}));
        let (_id, _rx) = state.streams.subscribe("agentbox-web", "main");

        let cleanup = LifecycleCleanup::new(state.clone());
        cleanup.container_disconnected("agentbox-web");

        assert!(state.streams.snapshot("agentbox-web", "main").is_none());
        assert_eq!(state.streams.subscriber_count("agentbox-web", "main"), 0);
        assert!(state.container_state.worktrees("agentbox-web").is_empty());
    }

    #[tokio::test]
    async fn get_completions_wraps_data() {
        let dir = tempdir().unwrap();
        let registry = build_registry(test_state(&dir));

        let handler = registry.request_handler("get_completions").unwrap();
        let response = handler("agentbox-web".to_string(), json!({"type": "projects"})).await;

        assert_eq!(response["ok"], true);
        assert_eq!(response["data"]["ok"], true);
        assert_eq!(response["data"]["projects"], json!([]));
    }
}
