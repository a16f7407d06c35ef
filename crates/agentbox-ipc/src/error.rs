//! IPC error types.

use thiserror::Error;

/// IPC error type.
#[derive(Error, Debug)]
pub enum IpcError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Socket error
    #[error("socket error: {0}")]
    Socket(String),

    /// Connection closed before a response arrived
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer took too long
    #[error("timed out")]
    Timeout,
}

/// Result type alias using IpcError.
pub type IpcResult<T> = Result<T, IpcError>;
