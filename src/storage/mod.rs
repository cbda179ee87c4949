//! Storage module - UTXO balance ledger and the pending-transaction pool

mod mempool;
mod utxo;

pub use mempool::*;
pub use utxo::*;
