//! Tunnel errors.

use agentbox_control::ControlError;
use thiserror::Error;

/// Errors produced by the SSH tunnel layer.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Operation targets a container with no live connection.
    #[error("container {0} not connected")]
    NotConnected(String),

    /// Deadline exceeded on a correlated request.
    #[error("failed to communicate with container")]
    Timeout,

    /// The underlying channel died.
    #[error("transport closed")]
    TransportClosed,

    /// Duplicate forward on the same (direction, host_port).
    #[error("{0}")]
    Conflict(String),

    /// Port bind or allow-list rejection.
    #[error("{0}")]
    InstallFailed(String),

    /// Ports below 1024 require root and are rejected before binding.
    #[error("port {0} is privileged (< 1024) and requires root")]
    PrivilegedPort(u16),

    /// Host key generation failed at startup.
    #[error("host key generation failed: {0}")]
    HostKey(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),
}

impl From<ControlError> for TunnelError {
    fn from(e: ControlError) -> Self {
        match e {
            ControlError::Timeout => TunnelError::Timeout,
            ControlError::TransportClosed => TunnelError::TransportClosed,
            ControlError::Serialization(e) => {
                TunnelError::InstallFailed(format!("serialization error: {e}"))
            }
        }
    }
}
