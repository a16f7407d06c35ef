//! Local control socket handlers.

pub mod handlers;
mod register;

pub use register::register_handlers;
