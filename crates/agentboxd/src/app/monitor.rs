//! Background monitors: overlay address polling and SIGPIPE handling.

use crate::app::DaemonState;
use crate::external;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Poll the Tailscale address and rebind remote listeners when it changes.
///
/// Not started at all when no bind address uses the token or the monitor is
/// disabled, so the daemon stays silent without an overlay.
pub fn spawn_overlay_monitor(state: DaemonState) -> Option<JoinHandle<()>> {
    if !state.config.uses_tailscale() || !state.config.tailscale_monitor.enabled {
        return None;
    }

    let interval = Duration::from_secs_f64(
        state
            .config
            .tailscale_monitor
            .check_interval_seconds
            .max(1.0),
    );

    Some(tokio::spawn(async move {
        let bind = state.tunnel.bind_addresses().clone();
        info!(
            interval_secs = interval.as_secs_f64(),
            current = ?bind.overlay_ip(),
            "tailscale monitor started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // the first tick fires immediately

        loop {
            ticker.tick().await;
            let previous = bind.overlay_ip();
            let current = external::tailscale::current_ip().await;
            if bind.set_overlay_ip(current) {
                info!(?previous, ?current, "tailscale address changed, rebinding listeners");
                state.tunnel.rebind_remote_listeners().await;
            }
        }
    }))
}

/// Translate SIGPIPE into a debug log instead of process termination.
pub fn spawn_sigpipe_guard() -> std::io::Result<JoinHandle<()>> {
    let mut stream = signal(SignalKind::pipe())?;
    Ok(tokio::spawn(async move {
        while stream.recv().await.is_some() {
            debug!("received SIGPIPE, ignoring");
        }
    }))
}
