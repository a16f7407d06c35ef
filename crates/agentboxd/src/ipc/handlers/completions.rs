//! Completion data for CLI tab-completion, computed from the in-memory
//! stores instead of hitting the Docker API.

use crate::app::DaemonState;
use crate::external::{docker, library};
use agentbox_core::{container_name_for_project, project_for_container, CONTAINER_PREFIX};
use agentbox_ipc::{err_response, IpcServer};
use serde_json::{json, Value};

/// Register the `get_completions` action.
pub async fn register(server: &IpcServer, state: DaemonState) {
    server
        .register_handler("get_completions", move |request| {
            let state = state.clone();
            async move { completions(&state, &request).await }
        })
        .await;
}

/// Compute one completion listing. Shared by the control socket action and
/// the SSH-side `get_completions` request.
pub async fn completions(state: &DaemonState, payload: &Value) -> Value {
    let comp_type = payload.get("type").and_then(Value::as_str).unwrap_or("");

    match comp_type {
        "projects" => {
            let projects: Vec<String> = state
                .tunnel
                .connected_containers()
                .iter()
                .filter_map(|name| project_for_container(name))
                .map(str::to_string)
                .collect();
            json!({"ok": true, "projects": projects})
        }

        "sessions" => {
            let sessions = match payload.get("project").and_then(Value::as_str) {
                Some(project) => {
                    let container = container_name_for_project(project);
                    state.streams.sessions(&container)
                }
                None => state
                    .streams
                    .all_sessions()
                    .into_iter()
                    .filter_map(|(container, session)| {
                        project_for_container(&container)
                            .map(|project| format!("{project}/{session}"))
                    })
                    .collect(),
            };
            json!({"ok": true, "sessions": sessions})
        }

        "worktrees" => {
            let worktrees = match payload.get("project").and_then(Value::as_str) {
                Some(project) => {
                    let container = container_name_for_project(project);
                    state.container_state.worktrees(&container)
                }
                None => state
                    .container_state
                    .all_worktrees(|name| name.starts_with(CONTAINER_PREFIX)),
            };
            json!({"ok": true, "worktrees": worktrees})
        }

        "mcp" => {
            let dir = state.library_dir().join("mcp");
            let names = tokio::task::spawn_blocking(move || library::list_entries(&dir))
                .await
                .unwrap_or_default();
            json!({"ok": true, "mcp_servers": names})
        }

        "skills" => {
            let dir = state.library_dir().join("skills");
            let names = tokio::task::spawn_blocking(move || library::list_entries(&dir))
                .await
                .unwrap_or_default();
            json!({"ok": true, "skills": names})
        }

        "docker_containers" => {
            let include_agentbox = payload
                .get("include_agentbox")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let names = docker::list_container_names(include_agentbox).await;
            json!({"ok": true, "docker_containers": names})
        }

        other => err_response(format!("unknown completion type: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbox_core::{Config, Paths};
    use agentbox_streams::{ContainerStateStore, StreamHub, StreamSnapshot};
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

    fn snap() -> StreamSnapshot {
        StreamSnapshot::new("buffer".to_string(), 0, 0, 80, 24)
    }

    #[tokio::test]
    async fn sessions_for_one_project_use_the_container_name() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);
        state.streams.apply_data("agentbox-my-app", "main", snap());

        let response = completions(
            &state,
            &json!({"type": "sessions", "project": "My App"}),
        )
        .await;

        assert_eq!(response["ok"], true);
        assert_eq!(response["sessions"], json!(["main"]));
    }

    #[tokio::test]
    async fn all_sessions_are_project_qualified_and_filtered() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);
        state.streams.apply_data("agentbox-web", "main", snap());
        state.streams.apply_data("postgres", "main", snap());

        let response = completions(&state, &json!({"type": "sessions"})).await;
        assert_eq!(response["sessions"], json!(["web/main"]));
    }

    #[tokio::test]
    async fn worktrees_come_from_the_state_store() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);
        state
            .container_state
            .update("agentbox-web", &json!({"worktrees": ["main", "feature-x"]}));
        state
            .container_state
            .update("postgres", &json!({"worktrees": ["hidden"]}));

        let scoped = completions(&state, &json!({"type": "worktrees", "project": "web"})).await;
        assert_eq!(scoped["worktrees"], json!(["main", "feature-x"]));

        let all = completions(&state, &json!({"type": "worktrees"})).await;
        assert_eq!(all["worktrees"], json!(["main", "feature-x"]));
    }

    #[tokio::test]
    async fn mcp_and_skills_list_the_library() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);
        let library = state.library_dir();
        std::fs::create_dir_all(library.join("mcp/github")).unwrap();
        std::fs::create_dir_all(library.join("skills/review")).unwrap();

        let mcp = completions(&state, &json!({"type": "mcp"})).await;
        assert_eq!(mcp["mcp_servers"], json!(["github"]));

        let skills = completions(&state, &json!({"type": "skills"})).await;
        assert_eq!(skills["skills"], json!(["review"]));
    }

    #[tokio::test]
    async fn unknown_type_is_an_error() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);

        let response = completions(&state, &json!({"type": "bogus"})).await;
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"], "unknown completion type: bogus");
    }

    #[tokio::test]
    async fn projects_listing_is_empty_without_connections() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);

        let response = completions(&state, &json!({"type": "projects"})).await;
        assert_eq!(response["projects"], json!([]));
    }
}
