//! Daemon wiring and lifecycle.

mod monitor;
mod state;

pub use state::{DaemonState, CONTAINER_REQUEST_TIMEOUT};

use crate::{control, external, ipc};
use agentbox_core::{Config, Paths};
use agentbox_ipc::IpcServer;
use agentbox_streams::ContainerStateStore;
use agentbox_tunnel::{BindAddresses, TunnelServer};
use anyhow::Context;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Run the daemon until an interrupt arrives.
///
/// Bring-up order is control socket first, then the SSH listener; teardown
/// runs in reverse. A fatal error from either listener before shutdown is
/// propagated so the process exits nonzero.
pub async fn run_daemon(config: Config, paths: Paths) -> anyhow::Result<()> {
    paths.ensure_dirs().context("creating runtime directory")?;

    let bind = Arc::new(BindAddresses::new(config.network.bind_addresses.clone()));
    if config.uses_tailscale() {
        bind.set_overlay_ip(external::tailscale::current_ip().await);
        info!(ip = ?bind.overlay_ip(), "initial tailscale address");
    }

    let tunnel = TunnelServer::new(paths.ssh_socket(), bind);
    let state = DaemonState {
        config: Arc::new(config),
        paths: Arc::new(paths),
        tunnel: tunnel.clone(),
        streams: agentbox_streams::StreamHub::new(),
        container_state: Arc::new(ContainerStateStore::new()),
    };

    // Control-channel handlers and lifecycle cleanup are registered once,
    // before the first connection can arrive.
    tunnel.install_handlers(control::build_registry(state.clone()));
    tunnel.add_observer(Arc::new(control::LifecycleCleanup::new(state.clone())));

    let ipc_server = Arc::new(IpcServer::new(&state.paths.control_socket()));
    ipc::register_handlers(&ipc_server, state.clone()).await;

    let mut ipc_task = {
        let server = ipc_server.clone();
        tokio::spawn(async move { server.run().await })
    };
    let mut tunnel_task = {
        let tunnel = tunnel.clone();
        tokio::spawn(async move { tunnel.run().await })
    };

    let _sigpipe = monitor::spawn_sigpipe_guard()?;
    let overlay_monitor = monitor::spawn_overlay_monitor(state.clone());

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        result = &mut ipc_task => {
            result.context("control socket task panicked")??;
            anyhow::bail!("control socket stopped unexpectedly");
        }
        result = &mut tunnel_task => {
            result.context("SSH listener task panicked")??;
            anyhow::bail!("SSH listener stopped unexpectedly");
        }
    }

    if let Some(task) = overlay_monitor {
        task.abort();
    }

    // Reverse of bring-up: SSH listener first, control socket last.
    tunnel.shutdown();
    let _ = tunnel_task.await;
    ipc_server.shutdown();
    let _ = ipc_task.await;

    info!("shutdown complete");
    Ok(())
}
