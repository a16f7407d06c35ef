//! Control-channel runtime: request/response correlation, handler
//! registries, and per-connection dispatch.
//!
//! The wire shapes live in `agentbox-proto`; this crate owns the behavior:
//! pending-request waiters with mandatory deadlines, the immutable handler
//! registry declared at daemon startup, and the dispatch rules that turn
//! inbound frames into handler invocations and outbound responses.

mod channel;
mod error;
mod pending;
mod registry;

pub use channel::{dispatch_message, ControlChannel};
pub use error::ControlError;
pub use pending::PendingRequests;
pub use registry::{HandlerRegistry, HandlerRegistryBuilder};
