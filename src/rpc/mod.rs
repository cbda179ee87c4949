//! JSON endpoints module
//!
//! Optional HTTP interface for wallets and explorers to query the node.

mod server;

pub use server::*;
