//! Docker container listing for CLI completion.

use agentbox_core::CONTAINER_PREFIX;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const DOCKER_TIMEOUT: Duration = Duration::from_secs(5);

/// Names of running docker containers. Agentbox's own containers are
/// excluded unless `include_agentbox` is set.
pub async fn list_container_names(include_agentbox: bool) -> Vec<String> {
    let result = tokio::time::timeout(
        DOCKER_TIMEOUT,
        Command::new("docker")
            .args(["ps", "--format", "{{.Names}}"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output(),
    )
    .await;

    let output = match result {
        Ok(Ok(output)) if output.status.success() => output,
        _ => {
            debug!("docker unavailable for completion listing");
            return Vec::new();
        }
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|name| !name.is_empty())
        .filter(|name| include_agentbox || !name.starts_with(CONTAINER_PREFIX))
        .collect()
}
