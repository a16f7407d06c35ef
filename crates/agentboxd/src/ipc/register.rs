//! Handler registration for the control socket.

use crate::app::DaemonState;
use crate::ipc::handlers;
use agentbox_ipc::IpcServer;
use tracing::info;

/// Register all control-socket action handlers.
pub async fn register_handlers(server: &IpcServer, state: DaemonState) {
    handlers::notify::register(server, state.clone()).await;
    handlers::ports::register(server, state.clone()).await;
    handlers::completions::register(server, state).await;

    info!("control socket handlers registered");
}
