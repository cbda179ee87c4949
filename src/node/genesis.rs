//! Genesis block
//!
//! The fixed first block of the chain. Every node on the network bakes
//! in the identical block; a single differing byte makes two nodes
//! mutually unintelligible. Nodes take their genesis at construction so
//! tests can substitute one.

use crate::consensus::{Block, BlockHeader, Proof, Transaction};
use crate::constants::{COINBASE_SENDER, INITIAL_SUPPLY};

/// When the genesis header was assembled (Unix timestamp)
pub const GENESIS_TIMESTAMP: i64 = 1585852979;

/// Timestamp of the minting transaction inside the genesis block
pub const GENESIS_TX_TIMESTAMP: i64 = 1585852961;

/// Public key holding the initial supply
pub const GENESIS_RECIPIENT: &str =
    "b61e63485c4782d6495aa0091c6785d8b6c0a945a23d9b158093bbf3d93d6bb9024e6cab467cc11b51e1b1a158637a778473418298b09a7dd39c148863b1833c";

/// The network's first block: a single transaction minting the initial
/// supply, no previous hash, and a zero-valued proof.
pub fn genesis_block() -> Block {
    Block {
        header: BlockHeader {
            timestamp: GENESIS_TIMESTAMP,
            transactions: vec![Transaction {
                sender: COINBASE_SENDER.to_string(),
                recipient: GENESIS_RECIPIENT.to_string(),
                amount: INITIAL_SUPPLY,
                timestamp: GENESIS_TX_TIMESTAMP,
                signature: String::new(),
            }],
            previous_hash: String::new(),
        },
        proof: Proof {
            nonce: 0,
            difficulty_threshold: 0,
        },
    }
}
