//! Block and chain validation
//!
//! Validity predicates that also emit the post-application UTXO. The
//! rules are deterministic across peers: any two nodes presented with
//! the same chain and the same oracle verdicts reach the same verdict.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::error;

use crate::consensus::{retarget, Block, Transaction};
use crate::constants::COINBASE_REWARD;
use crate::crypto::{satisfies_difficulty, SignatureOracle};
use crate::storage::Utxo;

/// Why a transaction was refused admission.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxRejection {
    #[error("misplaced or malformed coinbase")]
    BadCoinbase,
    #[error("amount must be positive")]
    ZeroAmount,
    #[error("amount exceeds the sender's balance")]
    Overdraft,
    #[error("signature was already spent")]
    DuplicateSignature,
    #[error("signature rejected by the oracle")]
    SignatureRejected,
}

/// Why a block or chain was rejected.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("chain is empty")]
    EmptyChain,
    #[error("genesis block does not match the network constant")]
    GenesisMismatch,
    #[error("block {0} confirms fewer than two transactions")]
    TooFewTransactions(usize),
    #[error("block {index} carries difficulty {found}, required {required}")]
    WrongDifficulty {
        index: usize,
        found: i64,
        required: i64,
    },
    #[error("block {0} does not link to its predecessor's hash")]
    BrokenLinkage(usize),
    #[error("block {0} fails its proof-of-work threshold")]
    InvalidProof(usize),
    #[error("block {index} transaction {position}: {reason}")]
    RejectedTransaction {
        index: usize,
        position: usize,
        reason: TxRejection,
    },
}

/// Admission predicate shared by block validation and the miner.
///
/// A transaction is admitted when its amount is positive and within the
/// sender's balance, its signature is unseen in both the confirmed set
/// and the pending set, and the oracle accepted it. On success the
/// transfer is applied to `utxo` and the signature joins `pending`.
pub fn admit_transaction(
    transaction: &Transaction,
    utxo: &mut Utxo,
    confirmed: &HashSet<String>,
    pending: &mut HashSet<String>,
    oracle_verdict: bool,
) -> Result<(), TxRejection> {
    if transaction.is_coinbase() {
        return Err(TxRejection::BadCoinbase);
    }
    if transaction.amount == 0 {
        return Err(TxRejection::ZeroAmount);
    }
    if transaction.amount > utxo.balance(&transaction.sender) {
        return Err(TxRejection::Overdraft);
    }
    if confirmed.contains(&transaction.signature) || pending.contains(&transaction.signature) {
        return Err(TxRejection::DuplicateSignature);
    }
    if !oracle_verdict {
        return Err(TxRejection::SignatureRejected);
    }

    utxo.transfer(&transaction.sender, &transaction.recipient, transaction.amount);
    pending.insert(transaction.signature.clone());
    Ok(())
}

/// Fetch oracle verdicts for a batch of transactions concurrently.
///
/// The oracle is high-latency, so requests run in parallel; ordering of
/// the returned vector matches the input. Coinbase entries are skipped
/// and an unreachable oracle counts as a rejection.
pub async fn fetch_verdicts(
    transactions: &[Transaction],
    oracle: &Arc<dyn SignatureOracle>,
) -> Vec<bool> {
    let mut requests = JoinSet::new();
    for (position, transaction) in transactions.iter().enumerate() {
        if transaction.is_coinbase() {
            continue;
        }
        let oracle = Arc::clone(oracle);
        let transaction = transaction.clone();
        requests.spawn(async move { (position, oracle.verify(&transaction).await) });
    }

    let mut verdicts = vec![false; transactions.len()];
    while let Some(joined) = requests.join_next().await {
        match joined {
            Ok((position, Ok(verdict))) => verdicts[position] = verdict,
            Ok((position, Err(error))) => {
                error!(%error, position, "signature oracle unavailable, treating as rejection");
            }
            Err(error) => error!(%error, "oracle verdict task failed"),
        }
    }
    verdicts
}

/// Validate the block at `index` against the chain it sits in.
///
/// `utxo_prefix` is the ledger state after `chain[..index]`;
/// `confirmed` holds every non-coinbase signature in those blocks.
/// Returns the post-application UTXO, or the first rule the block broke.
pub async fn validate_block(
    index: usize,
    chain: &[Block],
    utxo_prefix: &Utxo,
    confirmed: &HashSet<String>,
    genesis: &Block,
    oracle: &Arc<dyn SignatureOracle>,
) -> Result<Utxo, ValidationError> {
    let block = &chain[index];

    // The genesis block is fixed: nothing to prove, only byte-equality.
    if index == 0 {
        if block != genesis {
            return Err(ValidationError::GenesisMismatch);
        }
        let mut utxo = utxo_prefix.clone();
        for transaction in &block.header.transactions {
            utxo.credit(&transaction.recipient, transaction.amount);
        }
        return Ok(utxo);
    }

    // Coinbase plus at least one real transaction.
    if block.header.transactions.len() < 2 {
        return Err(ValidationError::TooFewTransactions(index));
    }

    let required = retarget(chain, index);
    let found = block.proof.difficulty_threshold;
    if found != required {
        return Err(ValidationError::WrongDifficulty {
            index,
            found,
            required,
        });
    }

    if block.header.previous_hash != chain[index - 1].hash() {
        return Err(ValidationError::BrokenLinkage(index));
    }

    if !satisfies_difficulty(&block.hash(), found) {
        return Err(ValidationError::InvalidProof(index));
    }

    let verdicts = fetch_verdicts(&block.header.transactions, oracle).await;

    let mut utxo = utxo_prefix.clone();
    let mut block_signatures = HashSet::new();
    for (position, transaction) in block.header.transactions.iter().enumerate() {
        if position == 0 {
            let well_formed = transaction.is_coinbase()
                && transaction.amount == COINBASE_REWARD
                && transaction.signature.is_empty();
            if !well_formed {
                return Err(ValidationError::RejectedTransaction {
                    index,
                    position,
                    reason: TxRejection::BadCoinbase,
                });
            }
            // Coinbase mints without debiting anyone.
            utxo.credit(&transaction.recipient, transaction.amount);
            continue;
        }

        admit_transaction(
            transaction,
            &mut utxo,
            confirmed,
            &mut block_signatures,
            verdicts[position],
        )
        .map_err(|reason| ValidationError::RejectedTransaction {
            index,
            position,
            reason,
        })?;
    }

    Ok(utxo)
}

/// Validate a whole chain from genesis, folding the UTXO forward.
pub async fn validate_chain(
    chain: &[Block],
    genesis: &Block,
    oracle: &Arc<dyn SignatureOracle>,
) -> Result<Utxo, ValidationError> {
    if chain.is_empty() {
        return Err(ValidationError::EmptyChain);
    }

    let mut utxo = Utxo::new();
    let mut confirmed = HashSet::new();
    for index in 0..chain.len() {
        utxo = validate_block(index, chain, &utxo, &confirmed, genesis, oracle).await?;
        for transaction in &chain[index].header.transactions {
            if !transaction.is_coinbase() {
                confirmed.insert(transaction.signature.clone());
            }
        }
    }

    Ok(utxo)
}

/// All non-coinbase signatures confirmed anywhere in a chain.
pub fn chain_signatures(chain: &[Block]) -> HashSet<String> {
    let mut confirmed = HashSet::new();
    for block in chain {
        for transaction in &block.header.transactions {
            if !transaction.is_coinbase() {
                confirmed.insert(transaction.signature.clone());
            }
        }
    }
    confirmed
}
