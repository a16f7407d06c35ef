//! Control-channel errors.

use thiserror::Error;

/// Errors surfaced to callers of the control channel.
#[derive(Error, Debug)]
pub enum ControlError {
    /// The per-call deadline fired before a response arrived.
    #[error("timeout waiting for response")]
    Timeout,

    /// The underlying channel died; all pending waiters fail with this.
    #[error("transport closed")]
    TransportClosed,

    /// A message could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
