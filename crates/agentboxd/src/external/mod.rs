//! Narrow interfaces to external collaborators: the desktop notifier,
//! clipboard tools, the Tailscale CLI, docker, and the library listing.

pub mod clipboard;
pub mod docker;
pub mod library;
pub mod notifier;
pub mod tailscale;
