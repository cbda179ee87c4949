//! P2P networking module - message codec and TCP peer transport

mod protocol;
mod transport;

pub use protocol::*;
pub use transport::*;
