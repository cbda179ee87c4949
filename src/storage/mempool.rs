//! Pending-transaction pool
//!
//! The waiting room of transactions admitted locally but not yet
//! confirmed by a block. Entries leave on confirmation or after aging
//! past the stale threshold; the pool never holds a signature that the
//! chain already confirms, nor duplicates of its own.

use std::collections::HashSet;

use tracing::warn;

use crate::consensus::Transaction;
use crate::constants::STALE_TX_SECONDS;

/// Ordered pool of admitted-but-unconfirmed transactions.
#[derive(Debug, Clone, Default)]
pub struct MemPool {
    pending: Vec<Transaction>,
}

impl MemPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any pending transaction carries this signature.
    pub fn contains_signature(&self, signature: &str) -> bool {
        self.pending
            .iter()
            .any(|transaction| transaction.signature == signature)
    }

    /// Append an admitted transaction. Callers run the duplicate and
    /// oracle checks first.
    pub fn push(&mut self, transaction: Transaction) {
        self.pending.push(transaction);
    }

    /// Drop every transaction older than the stale threshold.
    /// Returns how many were evicted.
    pub fn evict_stale(&mut self, now: i64) -> usize {
        let before = self.pending.len();
        self.pending.retain(|transaction| {
            let young = now - transaction.timestamp <= STALE_TX_SECONDS;
            if !young {
                warn!(?transaction, "removing a stale transaction from the mempool");
            }
            young
        });
        before - self.pending.len()
    }

    /// Drop every pending transaction whose signature a block confirmed.
    pub fn remove_confirmed(&mut self, confirmed: &[Transaction]) {
        let signatures: HashSet<&str> = confirmed
            .iter()
            .filter(|transaction| !transaction.is_coinbase())
            .map(|transaction| transaction.signature.as_str())
            .collect();

        self.pending
            .retain(|transaction| !signatures.contains(transaction.signature.as_str()));
    }

    /// The pending transactions in admission order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
