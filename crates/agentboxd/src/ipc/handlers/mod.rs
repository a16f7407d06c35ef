//! Handler modules for the action protocol.

pub mod completions;
pub mod notify;
pub mod ports;
