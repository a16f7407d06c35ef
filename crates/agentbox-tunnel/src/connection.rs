//! Per-container connection bookkeeping.

use agentbox_control::ControlChannel;
use agentbox_proto::{ForwardDirection, PortForward};
use chrono::{DateTime, Utc};
use russh::server::Handle;
use russh::ChannelId;
use std::collections::HashMap;
use tokio::task::JoinHandle;

/// A remote-direction forward's intent, recorded by `port_add` before the
/// container issues the SSH-level tcpip-forward request.
#[derive(Debug, Clone)]
pub(crate) struct RemoteIntent {
    pub container_port: u16,
    pub name: String,
}

/// A live remote-direction forward: the record plus its listener tasks.
pub(crate) struct RemoteForward {
    pub forward: PortForward,
    /// Address string the client asked to listen on; echoed back when
    /// opening forwarded-tcpip channels so the agent can match them.
    pub client_address: String,
    pub listeners: Vec<JoinHandle<()>>,
}

impl RemoteForward {
    pub fn abort_listeners(&mut self) {
        for task in self.listeners.drain(..) {
            task.abort();
        }
    }
}

/// One live container connection. Owned exclusively by the tunnel server's
/// connections map; accessors copy handles out under the lock.
pub(crate) struct Connection {
    pub conn_id: u64,
    pub name: String,
    pub connected_at: DateTime<Utc>,
    pub handle: Handle,
    pub control_channel: ChannelId,
    pub control: ControlChannel,
    pub local_forwards: Vec<PortForward>,
    pub remote_forwards: Vec<RemoteForward>,
    pub pending_remote: HashMap<u16, RemoteIntent>,
    pub writer_task: JoinHandle<()>,
    pub dispatcher_task: JoinHandle<()>,
}

impl Connection {
    pub fn has_local_forward(&self, host_port: u16) -> bool {
        self.local_forwards.iter().any(|f| f.host_port == host_port)
    }

    pub fn remove_local_forward(&mut self, host_port: u16) -> Option<PortForward> {
        let idx = self
            .local_forwards
            .iter()
            .position(|f| f.host_port == host_port && f.direction == ForwardDirection::Local)?;
        Some(self.local_forwards.remove(idx))
    }

    pub fn remove_remote_forward(&mut self, host_port: u16) -> Option<RemoteForward> {
        let idx = self
            .remote_forwards
            .iter()
            .position(|f| f.forward.host_port == host_port)?;
        Some(self.remote_forwards.remove(idx))
    }
}
