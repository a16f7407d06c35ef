//! Frame codec errors.

use thiserror::Error;

/// Errors produced while encoding or decoding control-channel frames.
#[derive(Error, Debug)]
pub enum FrameError {
    /// A frame body (declared or serialized) exceeds the hard size cap.
    /// Fatal for the connection: the body must not be consumed.
    #[error("frame of {len} bytes exceeds the {max} byte cap")]
    Oversize { len: usize, max: usize },

    /// A complete frame did not contain valid JSON. The frame has been
    /// drained from the decode buffer; the connection may continue.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}
