//! Tailscale address discovery.

use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const TAILSCALE_TIMEOUT: Duration = Duration::from_secs(2);

/// The host's current Tailscale IPv4 address, if the overlay is up.
pub async fn current_ip() -> Option<IpAddr> {
    let result = tokio::time::timeout(
        TAILSCALE_TIMEOUT,
        Command::new("tailscale")
            .args(["ip", "-4"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output(),
    )
    .await;

    let output = match result {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(_)) | Ok(Err(_)) => {
            debug!("tailscale CLI unavailable or not logged in");
            return None;
        }
        Err(_) => {
            debug!("tailscale ip timed out");
            return None;
        }
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .and_then(|line| line.trim().parse().ok())
}
