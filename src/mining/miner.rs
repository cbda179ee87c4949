//! Block miner
//!
//! Assembles a candidate block from mempool snapshots and searches for
//! a nonce. Mining never mutates live node state: it works on copies
//! and reads the shared mining flag cooperatively, so the node can
//! cancel the search the moment a competing block arrives.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error};

use crate::consensus::{
    admit_transaction, fetch_verdicts, last_block, retarget, unix_now, Block, BlockHeader, Proof,
    PublicKey, Transaction,
};
use crate::crypto::{satisfies_difficulty, sha256_hex, SignatureOracle};
use crate::storage::Utxo;

/// What a mining attempt produced.
#[derive(Debug)]
pub enum MiningOutcome {
    /// A block whose proof satisfies the difficulty threshold
    Mined(Block),
    /// The mining flag was cleared before a nonce was found
    Cancelled,
    /// No admissible transactions beyond the coinbase; nothing to mine
    NoTransactions,
}

/// Block miner working on snapshots of chain, UTXO, and mempool.
pub struct Miner {
    /// Public key credited by the coinbase of every block this miner finds
    operator_key: PublicKey,
    /// Level-triggered cancellation: the node clears it to stop the search
    mining_flag: Arc<AtomicBool>,
}

impl Miner {
    pub fn new(operator_key: PublicKey, mining_flag: Arc<AtomicBool>) -> Self {
        Self {
            operator_key,
            mining_flag,
        }
    }

    /// Build the candidate block: coinbase first, then every mempool
    /// transaction (in ascending timestamp order) that passes the
    /// admission predicate against a UTXO copy. Returns `None` and
    /// clears the mining flag when only the coinbase would remain -
    /// empty blocks are never mined.
    pub async fn assemble(
        &self,
        chain: &[Block],
        utxo: &Utxo,
        mempool: &[Transaction],
        confirmed: &HashSet<String>,
        oracle: &Arc<dyn SignatureOracle>,
    ) -> Option<Block> {
        let mut candidates = mempool.to_vec();
        candidates.sort_by_key(|transaction| transaction.timestamp);

        let verdicts = fetch_verdicts(&candidates, oracle).await;

        let now = unix_now();
        let coinbase = Transaction::coinbase(self.operator_key.clone(), now);

        let mut working_utxo = utxo.clone();
        working_utxo.credit(&coinbase.recipient, coinbase.amount);

        let mut transactions = vec![coinbase];
        let mut pending = HashSet::new();
        for (position, candidate) in candidates.into_iter().enumerate() {
            match admit_transaction(
                &candidate,
                &mut working_utxo,
                confirmed,
                &mut pending,
                verdicts[position],
            ) {
                Ok(()) => transactions.push(candidate),
                Err(reason) => {
                    debug!(%reason, "dropping a mempool transaction from the candidate block");
                }
            }
        }

        if transactions.len() == 1 {
            self.mining_flag.store(false, Ordering::SeqCst);
            return None;
        }

        Some(Block {
            header: BlockHeader {
                timestamp: now,
                transactions,
                previous_hash: last_block(chain).hash(),
            },
            proof: Proof {
                nonce: 0,
                difficulty_threshold: retarget(chain, chain.len()),
            },
        })
    }

    /// Run a full mining attempt: raise the mining flag, assemble a
    /// candidate, and search for a nonce on a blocking thread.
    pub async fn mine(
        &self,
        chain: &[Block],
        utxo: &Utxo,
        mempool: &[Transaction],
        confirmed: &HashSet<String>,
        oracle: &Arc<dyn SignatureOracle>,
    ) -> MiningOutcome {
        self.mining_flag.store(true, Ordering::SeqCst);

        let Some(candidate) = self.assemble(chain, utxo, mempool, confirmed, oracle).await else {
            return MiningOutcome::NoTransactions;
        };

        let mining_flag = Arc::clone(&self.mining_flag);
        match tokio::task::spawn_blocking(move || search_nonce(candidate, &mining_flag)).await {
            Ok(Some(block)) => MiningOutcome::Mined(block),
            Ok(None) => MiningOutcome::Cancelled,
            Err(error) => {
                error!(%error, "nonce search task failed");
                MiningOutcome::Cancelled
            }
        }
    }
}

/// Increment the nonce until the block's hash satisfies its difficulty
/// threshold, or the mining flag is cleared externally. The flag is
/// polled on every attempt, so cancellation lands within one iteration.
fn search_nonce(mut block: Block, mining_flag: &AtomicBool) -> Option<Block> {
    // The header never changes during the search; render it once.
    let rendered_header = block.header.to_string();

    loop {
        if !mining_flag.load(Ordering::SeqCst) {
            return None;
        }

        let digest = sha256_hex(&format!("{}-{}", block.proof, rendered_header));
        if satisfies_difficulty(&digest, block.proof.difficulty_threshold) {
            return Some(block);
        }

        block.proof.nonce += 1;
    }
}
