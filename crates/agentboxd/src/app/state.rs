//! Shared daemon state.

use agentbox_core::{Config, Paths};
use agentbox_streams::{ContainerStateStore, StreamHub};
use agentbox_tunnel::TunnelServer;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Deadline for requests proxied to a container.
pub const CONTAINER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared daemon state handed to every handler.
#[derive(Clone)]
pub struct DaemonState {
    pub config: Arc<Config>,
    pub paths: Arc<Paths>,
    pub tunnel: Arc<TunnelServer>,
    pub streams: StreamHub,
    pub container_state: Arc<ContainerStateStore>,
}

impl DaemonState {
    /// Send terminal input to a container's streaming agent.
    ///
    /// Host-facing consumers (the web layer) call this; it mirrors the
    /// reverse-direction `stream_input` request.
    #[allow(dead_code)]
    pub async fn send_input(
        &self,
        container: &str,
        session: &str,
        keys: &str,
        literal: bool,
    ) -> bool {
        let payload = json!({
            "session": session,
            "keys": keys,
            "literal": literal,
        });
        match self
            .tunnel
            .request(container, "stream_input", payload, CONTAINER_REQUEST_TIMEOUT)
            .await
        {
            Ok(response) => response["ok"].as_bool().unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Effective library directory for completion listings.
    pub fn library_dir(&self) -> std::path::PathBuf {
        self.config.library_dir(self.paths.as_ref())
    }
}
