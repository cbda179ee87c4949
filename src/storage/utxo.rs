//! UTXO balance ledger
//!
//! Maps each public key to its spendable balance. Derived state: the
//! ledger is fully reproducible by folding every transaction from
//! genesis forward, and no balance ever goes negative.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::consensus::PublicKey;

/// The amount of unspent coin each user holds, keyed by public key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Utxo {
    balances: HashMap<PublicKey, u64>,
}

impl Utxo {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance for a key; unknown keys hold zero.
    pub fn balance(&self, key: &str) -> u64 {
        self.balances.get(key).copied().unwrap_or(0)
    }

    /// Mint coin to a key without debiting anyone.
    pub fn credit(&mut self, key: &str, amount: u64) {
        *self.balances.entry(key.to_string()).or_insert(0) += amount;
    }

    /// Move coin between keys. Callers check the sender's balance first;
    /// the debit saturates rather than underflow.
    pub fn transfer(&mut self, sender: &str, recipient: &str, amount: u64) {
        let debited = self.balance(sender).saturating_sub(amount);
        self.balances.insert(sender.to_string(), debited);
        self.credit(recipient, amount);
    }

    /// Sum of every balance in the ledger.
    pub fn total_supply(&self) -> u64 {
        self.balances.values().sum()
    }

    /// Number of keys holding a balance entry.
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}
