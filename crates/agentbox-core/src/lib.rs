//! Shared foundation for the agentbox daemon: paths, configuration, logging.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, NetworkConfig, NotificationsConfig, TailscaleMonitorConfig, TAILSCALE_TOKEN,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_with_file};
pub use paths::Paths;

/// Prefix used for container names managed by agentbox.
pub const CONTAINER_PREFIX: &str = "agentbox-";

/// Map a project name to its container name, the way the CLI does when
/// creating containers (lowercase, everything outside `[a-z0-9_-]` becomes
/// a dash).
pub fn container_name_for_project(project: &str) -> String {
    let sanitized: String = project
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{CONTAINER_PREFIX}{sanitized}")
}

/// Strip the agentbox prefix from a container name, if present.
pub fn project_for_container(container: &str) -> Option<&str> {
    container.strip_prefix(CONTAINER_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_project_names() {
        assert_eq!(container_name_for_project("web"), "agentbox-web");
        assert_eq!(container_name_for_project("My App"), "agentbox-my-app");
        assert_eq!(container_name_for_project("a.b/c"), "agentbox-a-b-c");
        assert_eq!(container_name_for_project("ok_name-1"), "agentbox-ok_name-1");
    }

    #[test]
    fn strips_container_prefix() {
        assert_eq!(project_for_container("agentbox-web"), Some("web"));
        assert_eq!(project_for_container("postgres"), None);
    }
}
