//! Block, header, proof, and transaction structures
//!
//! These types carry the canonical textual rendering every node hashes.
//! The rendering is frozen: fields in declaration order, single spaces,
//! curly braces around each record, square brackets around the
//! transaction list, and a single `-` between proof and header. Empty
//! strings render as nothing (their separating space remains).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::{COINBASE_REWARD, COINBASE_SENDER};
use crate::crypto::sha256_hex;

/// A user's public key (hex, ECDSA secp256k1). The reserved literal `"0"`
/// denotes the coinbase sender.
pub type PublicKey = String;

/// A signed transfer of coin between two public keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    /// Public key of the sender
    pub sender: PublicKey,
    /// Public key of the recipient
    pub recipient: PublicKey,
    /// Amount of coin transferred
    pub amount: u64,
    /// When the transaction was made (seconds since Unix epoch). Only
    /// used to order transactions; accuracy is not required.
    pub timestamp: i64,
    /// Hex ECDSA signature over [`Transaction::signing_payload`].
    /// Empty for coinbase transactions.
    pub signature: String,
}

impl Transaction {
    /// Create the coinbase transaction that mints this block's reward.
    pub fn coinbase(recipient: impl Into<PublicKey>, timestamp: i64) -> Self {
        Self {
            sender: COINBASE_SENDER.to_string(),
            recipient: recipient.into(),
            amount: COINBASE_REWARD,
            timestamp,
            signature: String::new(),
        }
    }

    /// Check if this is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.sender == COINBASE_SENDER
    }

    /// The exact string the sender signs. Part of the wire contract.
    pub fn signing_payload(&self) -> String {
        format!(
            "{} -{}-> {} ({})",
            self.sender, self.amount, self.recipient, self.timestamp
        )
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{} {} {} {} {}}}",
            self.sender, self.recipient, self.amount, self.timestamp, self.signature
        )
    }
}

/// The nonce and difficulty threshold that prove work was done on a header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proof {
    /// The random factor that changes the hash
    pub nonce: i64,
    /// The number of leading `0` hex characters required of the hash
    pub difficulty_threshold: i64,
}

impl fmt::Display for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{} {}}}", self.nonce, self.difficulty_threshold)
    }
}

/// A block header: timestamp, ordered transactions, and the previous
/// block's hash. The first transaction of every non-genesis block is
/// the coinbase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// When this header was assembled (seconds since Unix epoch)
    pub timestamp: i64,
    /// The transactions this block confirms, in authoritative order
    pub transactions: Vec<Transaction>,
    /// Hash of the previous block (empty for genesis)
    pub previous_hash: String,
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{} [", self.timestamp)?;
        for (position, transaction) in self.transactions.iter().enumerate() {
            if position > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", transaction)?;
        }
        write!(f, "] {}}}", self.previous_hash)
    }
}

/// A header plus the proof that validates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub proof: Proof,
}

impl Block {
    /// The canonical pre-image hashed to identify this block.
    pub fn preimage(&self) -> String {
        format!("{}-{}", self.proof, self.header)
    }

    /// Hash of this block as lowercase hex.
    pub fn hash(&self) -> String {
        sha256_hex(&self.preimage())
    }
}

/// The most recent block of a chain. Chains are never empty.
pub fn last_block(chain: &[Block]) -> &Block {
    &chain[chain.len() - 1]
}

/// Current wall-clock time as seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transaction() -> Transaction {
        Transaction {
            sender: "alice".to_string(),
            recipient: "bob".to_string(),
            amount: 25,
            timestamp: 1600000000,
            signature: "f00d".to_string(),
        }
    }

    fn sample_block() -> Block {
        Block {
            header: BlockHeader {
                timestamp: 1600000060,
                transactions: vec![
                    Transaction::coinbase("miner", 1600000050),
                    sample_transaction(),
                ],
                previous_hash: "abc123".to_string(),
            },
            proof: Proof {
                nonce: 7,
                difficulty_threshold: 5,
            },
        }
    }

    #[test]
    fn test_transaction_rendering() {
        assert_eq!(
            sample_transaction().to_string(),
            "{alice bob 25 1600000000 f00d}"
        );
    }

    #[test]
    fn test_coinbase_rendering_keeps_empty_signature_slot() {
        let coinbase = Transaction::coinbase("miner", 1600000050);
        assert_eq!(coinbase.to_string(), "{0 miner 1000 1600000050 }");
    }

    #[test]
    fn test_header_rendering() {
        let block = sample_block();
        assert_eq!(
            block.header.to_string(),
            "{1600000060 [{0 miner 1000 1600000050 } {alice bob 25 1600000000 f00d}] abc123}"
        );
    }

    #[test]
    fn test_empty_header_rendering() {
        let header = BlockHeader {
            timestamp: 1,
            transactions: vec![],
            previous_hash: String::new(),
        };
        assert_eq!(header.to_string(), "{1 [] }");
    }

    #[test]
    fn test_preimage_joins_proof_and_header() {
        let block = sample_block();
        assert_eq!(
            block.preimage(),
            format!("{}-{}", block.proof, block.header)
        );
        assert!(block.preimage().starts_with("{7 5}-{1600000060 ["));
    }

    #[test]
    fn test_hash_is_deterministic() {
        let block = sample_block();
        assert_eq!(block.hash(), block.hash());
        assert_eq!(block.hash().len(), 64);
    }

    #[test]
    fn test_transaction_order_changes_hash() {
        let block = sample_block();
        let mut reordered = block.clone();
        reordered.header.transactions.reverse();
        assert_ne!(block.hash(), reordered.hash());
    }

    #[test]
    fn test_signing_payload_format() {
        assert_eq!(
            sample_transaction().signing_payload(),
            "alice -25-> bob (1600000000)"
        );
    }

    #[test]
    fn test_coinbase_detection() {
        assert!(Transaction::coinbase("miner", 0).is_coinbase());
        assert!(!sample_transaction().is_coinbase());
    }

    #[test]
    fn test_last_block() {
        let chain = vec![sample_block(), sample_block()];
        assert_eq!(last_block(&chain), &chain[1]);
    }
}
