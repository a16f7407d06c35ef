//! Wire types for the agentbox control channel.
//!
//! Containers talk to the daemon over a single SSH session channel carrying
//! length-prefixed JSON frames. This crate owns the frame codec and the
//! message/forward types both ends agree on.

mod error;
mod forward;
mod frame;
mod message;

pub use error::FrameError;
pub use forward::{ForwardDirection, PortForward};
pub use frame::{encode_frame, FrameDecoder, MAX_FRAME_LEN};
pub use message::{correlation_id, ControlMessage, MessageKind};
