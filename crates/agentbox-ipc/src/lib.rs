//! Local control socket: newline-delimited JSON requests from host CLI
//! tools, one response per connection.

mod error;
mod protocol;
mod server;

pub use error::{IpcError, IpcResult};
pub use protocol::{err_response, errors, ok_response};
pub use server::{IpcClient, IpcServer};
