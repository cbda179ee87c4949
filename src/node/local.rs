//! Local node state machine
//!
//! The node is a single logical actor owning the chain, mempool, UTXO,
//! and the mining flag. All mutation happens under one exclusive lock;
//! the miner works on snapshots outside it so peer traffic is never
//! blocked by a nonce search.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::consensus::{
    chain_signatures, last_block, unix_now, validate_block, validate_chain, Block, PublicKey,
    Transaction,
};
use crate::constants::CONSENSUS_COLLECT_SECONDS;
use crate::crypto::SignatureOracle;
use crate::mining::{Miner, MiningOutcome};
use crate::p2p::{NodeMessage, PeerNetwork};
use crate::storage::{MemPool, Utxo};

/// Mutable node state, guarded by one exclusive lock.
struct NodeState {
    chain: Vec<Block>,
    mempool: MemPool,
    utxo: Utxo,
    /// Every non-coinbase signature confirmed in `chain`
    confirmed_signatures: HashSet<String>,
}

/// A running node: local chain, pending pool, balance ledger, mining
/// flag, and handles to the oracle and the peer network.
pub struct LocalNode {
    state: Mutex<NodeState>,
    /// Raised while a mining attempt runs; cleared to cancel it
    mining_flag: Arc<AtomicBool>,
    /// Collector for chains offered during an in-flight consensus request
    incoming_chains: StdMutex<Option<mpsc::Sender<Vec<Block>>>>,
    oracle: Arc<dyn SignatureOracle>,
    network: Arc<dyn PeerNetwork>,
    operator_key: PublicKey,
    minimum_chains_for_consensus: usize,
    genesis: Block,
}

impl LocalNode {
    /// Build a node whose chain starts at `genesis`.
    pub fn new(
        genesis: Block,
        operator_key: PublicKey,
        minimum_chains_for_consensus: usize,
        oracle: Arc<dyn SignatureOracle>,
        network: Arc<dyn PeerNetwork>,
    ) -> Arc<Self> {
        let mut utxo = Utxo::new();
        for transaction in &genesis.header.transactions {
            utxo.credit(&transaction.recipient, transaction.amount);
        }

        Arc::new(Self {
            state: Mutex::new(NodeState {
                chain: vec![genesis.clone()],
                mempool: MemPool::new(),
                utxo,
                confirmed_signatures: HashSet::new(),
            }),
            mining_flag: Arc::new(AtomicBool::new(false)),
            incoming_chains: StdMutex::new(None),
            oracle,
            network,
            operator_key,
            minimum_chains_for_consensus,
            genesis,
        })
    }

    /// Admit a transaction to the mempool. Silently refused when the
    /// oracle rejects it or its signature already appears in the
    /// mempool or the chain. Broadcasts to peers when asked to.
    pub async fn submit_transaction(&self, transaction: Transaction, broadcast: bool) -> bool {
        if transaction.is_coinbase() {
            warn!("refusing a loose coinbase transaction");
            return false;
        }

        match self.oracle.verify(&transaction).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(?transaction, "oracle rejected a submitted transaction");
                return false;
            }
            Err(oracle_error) => {
                error!(%oracle_error, "oracle unreachable, dropping the submitted transaction");
                return false;
            }
        }

        {
            let mut state = self.state.lock().await;
            if state.mempool.contains_signature(&transaction.signature)
                || state.confirmed_signatures.contains(&transaction.signature)
            {
                debug!("ignoring a transaction we already know");
                return false;
            }
            state.mempool.push(transaction.clone());
        }

        info!("added a transaction to the mempool");
        if broadcast {
            self.network
                .broadcast(NodeMessage::NewTransaction(transaction))
                .await;
        }
        true
    }

    /// Try to extend the chain with a block, typically one a peer mined.
    ///
    /// Any in-flight mining attempt is cancelled first. When the block
    /// does not build on our tip we probably missed its predecessor, so
    /// consensus runs before the block is judged. Returns whether the
    /// chain was extended.
    pub async fn accept_block(&self, block: Block) -> bool {
        self.mining_flag.store(false, Ordering::SeqCst);

        let tip_mismatch = {
            let state = self.state.lock().await;
            block.header.previous_hash != last_block(&state.chain).hash()
        };
        if tip_mismatch {
            warn!("block does not extend our tip, requesting consensus first");
            self.request_consensus().await;
        }

        let mut state = self.state.lock().await;
        state.chain.push(block);
        let index = state.chain.len() - 1;

        let NodeState {
            chain,
            mempool,
            utxo,
            confirmed_signatures,
        } = &mut *state;

        match validate_block(index, chain, utxo, confirmed_signatures, &self.genesis, &self.oracle)
            .await
        {
            Ok(next_utxo) => {
                let confirmed = chain[index].header.transactions.clone();
                *utxo = next_utxo;
                for transaction in &confirmed {
                    if !transaction.is_coinbase() {
                        confirmed_signatures.insert(transaction.signature.clone());
                    }
                }
                mempool.remove_confirmed(&confirmed);
                info!(height = chain.len(), "extended the chain with a new block");
                true
            }
            Err(validation_error) => {
                chain.pop();
                warn!(%validation_error, "rejected an incoming block");
                false
            }
        }
    }

    /// Adopt the longest valid chain among the candidates, if any beats
    /// our own. Candidates are tried longest-first; the search stops as
    /// soon as one is shorter than the local chain.
    pub async fn consensus(&self, mut candidates: Vec<Vec<Block>>) -> bool {
        candidates.sort_by(|left, right| right.len().cmp(&left.len()));

        let mut state = self.state.lock().await;
        for candidate in candidates {
            if candidate.len() < state.chain.len() {
                info!("our chain is the longest offered, keeping it");
                return false;
            }

            match validate_chain(&candidate, &self.genesis, &self.oracle).await {
                Ok(utxo) => {
                    for block in &candidate {
                        state.mempool.remove_confirmed(&block.header.transactions);
                    }
                    state.confirmed_signatures = chain_signatures(&candidate);
                    state.utxo = utxo;
                    state.chain = candidate;
                    self.mining_flag.store(false, Ordering::SeqCst);
                    info!(
                        height = state.chain.len(),
                        "adopted a longer valid chain from peers"
                    );
                    return true;
                }
                Err(validation_error) => {
                    warn!(%validation_error, "peer chain failed validation");
                }
            }
        }

        info!("no offered chain was both valid and long enough");
        false
    }

    /// Ask every peer for its chain and run consensus on the replies.
    ///
    /// Collection stops once `minimum_chains_for_consensus` chains have
    /// arrived or the deadline passes, whichever is first; whatever
    /// arrived by then is judged.
    pub async fn request_consensus(&self) -> bool {
        if self.network.peer_count() == 0 {
            warn!("no peers available to request chains from");
            return false;
        }

        let wanted = self.minimum_chains_for_consensus.max(1);
        let (sender, mut receiver) = mpsc::channel(wanted);
        *self.incoming_chains.lock().unwrap() = Some(sender);

        self.network.broadcast(NodeMessage::NeedChain).await;

        let deadline = Instant::now() + Duration::from_secs(CONSENSUS_COLLECT_SECONDS);
        let mut chains = Vec::new();
        while chains.len() < wanted {
            match timeout_at(deadline, receiver.recv()).await {
                Ok(Some(chain)) => chains.push(chain),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        collected = chains.len(),
                        "consensus deadline passed, proceeding with what arrived"
                    );
                    break;
                }
            }
        }
        *self.incoming_chains.lock().unwrap() = None;

        if chains.is_empty() {
            return false;
        }
        self.consensus(chains).await
    }

    /// Hand over a chain a peer offered. Dropped unless a consensus
    /// request is in flight and its buffer has room.
    pub fn offer_chain(&self, chain: Vec<Block>) {
        let collector = self.incoming_chains.lock().unwrap().clone();
        match collector {
            Some(sender) => {
                if sender.try_send(chain).is_err() {
                    debug!("chain collector full, dropping an offered chain");
                }
            }
            None => debug!("ignoring an unsolicited peer chain"),
        }
    }

    /// Periodic maintenance: evict stale mempool transactions, then
    /// mine if there is work and no attempt is already running. A mined
    /// block is applied locally and broadcast to every peer.
    pub async fn tick(&self) {
        let snapshot = {
            let mut state = self.state.lock().await;
            let evicted = state.mempool.evict_stale(unix_now());
            if evicted > 0 {
                info!(evicted, "evicted stale mempool transactions");
            }

            if state.mempool.is_empty() || self.mining_flag.load(Ordering::SeqCst) {
                None
            } else {
                Some((
                    state.chain.clone(),
                    state.utxo.clone(),
                    state.mempool.transactions().to_vec(),
                    state.confirmed_signatures.clone(),
                ))
            }
        };

        let Some((chain, utxo, mempool, confirmed)) = snapshot else {
            return;
        };

        info!(pending = mempool.len(), "starting to mine a block");
        let miner = Miner::new(self.operator_key.clone(), Arc::clone(&self.mining_flag));
        match miner
            .mine(&chain, &utxo, &mempool, &confirmed, &self.oracle)
            .await
        {
            MiningOutcome::Mined(block) => {
                if self.accept_block(block.clone()).await {
                    info!("mined a block and added it to the chain");
                    self.network.broadcast(NodeMessage::NewBlock(block)).await;
                } else {
                    warn!("the block we mined failed validation and was discarded");
                }
            }
            MiningOutcome::Cancelled => info!("mining was cancelled before a proof was found"),
            MiningOutcome::NoTransactions => info!("no admissible transactions, mining skipped"),
        }
    }

    /// Copy of the local chain.
    pub async fn chain_snapshot(&self) -> Vec<Block> {
        self.state.lock().await.chain.clone()
    }

    /// Copy of the balance ledger.
    pub async fn utxo_snapshot(&self) -> Utxo {
        self.state.lock().await.utxo.clone()
    }

    /// Copy of the pending transactions.
    pub async fn mempool_snapshot(&self) -> Vec<Transaction> {
        self.state.lock().await.mempool.transactions().to_vec()
    }

    /// Whether a mining attempt is currently running.
    pub fn is_mining(&self) -> bool {
        self.mining_flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{retarget, BlockHeader, Proof};
    use crate::crypto::{satisfies_difficulty, StaticOracle};
    use crate::node::genesis_block;
    use async_trait::async_trait;

    /// Peer network that records every broadcast instead of sending it.
    struct RecordingNetwork {
        peers: usize,
        sent: StdMutex<Vec<NodeMessage>>,
    }

    impl RecordingNetwork {
        fn with_peers(peers: usize) -> Arc<Self> {
            Arc::new(Self {
                peers,
                sent: StdMutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<NodeMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PeerNetwork for RecordingNetwork {
        async fn broadcast(&self, message: NodeMessage) {
            self.sent.lock().unwrap().push(message);
        }

        fn peer_count(&self) -> usize {
            self.peers
        }
    }

    fn test_node(network: Arc<RecordingNetwork>) -> Arc<LocalNode> {
        LocalNode::new(
            genesis_block(),
            "operator".to_string(),
            1,
            Arc::new(StaticOracle::accepting()),
            network,
        )
    }

    fn transfer(sender: &str, amount: u64, timestamp: i64, signature: &str) -> Transaction {
        Transaction {
            sender: sender.to_string(),
            recipient: "k1".to_string(),
            amount,
            timestamp,
            signature: signature.to_string(),
        }
    }

    fn genesis_recipient() -> String {
        genesis_block().header.transactions[0].recipient.clone()
    }

    /// Mine the next block of `chain` confirming `transactions`.
    fn mine_next(chain: &[Block], transactions: Vec<Transaction>) -> Block {
        let mut candidate = Block {
            header: BlockHeader {
                timestamp: last_block(chain).header.timestamp + 600,
                transactions,
                previous_hash: last_block(chain).hash(),
            },
            proof: Proof {
                nonce: 0,
                difficulty_threshold: retarget(chain, chain.len()),
            },
        };
        while !satisfies_difficulty(&candidate.hash(), candidate.proof.difficulty_threshold) {
            candidate.proof.nonce += 1;
        }
        candidate
    }

    #[tokio::test]
    async fn test_submit_transaction_admits_and_broadcasts() {
        let network = RecordingNetwork::with_peers(2);
        let node = test_node(network.clone());
        let transaction = transfer("alice", 10, unix_now(), "sig-a");

        assert!(node.submit_transaction(transaction.clone(), true).await);
        assert_eq!(node.mempool_snapshot().await.len(), 1);
        assert_eq!(
            network.sent(),
            vec![NodeMessage::NewTransaction(transaction)]
        );
    }

    #[tokio::test]
    async fn test_submit_without_broadcast_stays_local() {
        let network = RecordingNetwork::with_peers(2);
        let node = test_node(network.clone());

        assert!(
            node.submit_transaction(transfer("alice", 10, unix_now(), "sig-a"), false)
                .await
        );
        assert!(network.sent().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_duplicates_by_signature() {
        let node = test_node(RecordingNetwork::with_peers(0));
        let transaction = transfer("alice", 10, unix_now(), "sig-a");

        assert!(node.submit_transaction(transaction.clone(), false).await);
        assert!(!node.submit_transaction(transaction, false).await);
        assert_eq!(node.mempool_snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_oracle_refusal() {
        let node = LocalNode::new(
            genesis_block(),
            "operator".to_string(),
            1,
            Arc::new(StaticOracle::rejecting()),
            RecordingNetwork::with_peers(0),
        );

        assert!(
            !node
                .submit_transaction(transfer("alice", 10, unix_now(), "sig-a"), false)
                .await
        );
        assert!(node.mempool_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_accept_block_extends_and_prunes_the_mempool() {
        let node = test_node(RecordingNetwork::with_peers(0));
        let sender = genesis_recipient();
        let confirmed_tx = transfer(&sender, 10, unix_now(), "sig-a");
        node.submit_transaction(confirmed_tx.clone(), false).await;

        let block = mine_next(
            &node.chain_snapshot().await,
            vec![Transaction::coinbase("operator", unix_now()), confirmed_tx],
        );

        assert!(node.accept_block(block).await);
        assert_eq!(node.chain_snapshot().await.len(), 2);
        assert!(node.mempool_snapshot().await.is_empty());
        assert_eq!(
            node.utxo_snapshot().await.balance("operator"),
            crate::constants::COINBASE_REWARD
        );
        assert!(!node.is_mining());
    }

    #[tokio::test]
    async fn test_accept_block_rolls_back_an_invalid_block() {
        let node = test_node(RecordingNetwork::with_peers(0));
        let chain = node.chain_snapshot().await;

        // Correct linkage but only a coinbase inside.
        let bad = Block {
            header: BlockHeader {
                timestamp: unix_now(),
                transactions: vec![Transaction::coinbase("operator", unix_now())],
                previous_hash: last_block(&chain).hash(),
            },
            proof: Proof {
                nonce: 0,
                difficulty_threshold: retarget(&chain, chain.len()),
            },
        };

        assert!(!node.accept_block(bad).await);
        assert_eq!(node.chain_snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_consensus_adopts_a_longer_valid_chain() {
        let node = test_node(RecordingNetwork::with_peers(0));
        let sender = genesis_recipient();

        // The peer's chain confirms sig-a; it sits in our mempool too.
        node.submit_transaction(transfer(&sender, 10, unix_now(), "sig-a"), false)
            .await;

        let genesis = genesis_block();
        let peer_block = mine_next(
            &[genesis.clone()],
            vec![
                Transaction::coinbase("rival", unix_now()),
                transfer(&sender, 10, unix_now(), "sig-a"),
            ],
        );
        let peer_chain = vec![genesis, peer_block];

        assert!(node.consensus(vec![peer_chain.clone()]).await);
        assert_eq!(node.chain_snapshot().await, peer_chain);
        assert!(node.mempool_snapshot().await.is_empty());
        assert_eq!(
            node.utxo_snapshot().await.balance("rival"),
            crate::constants::COINBASE_REWARD
        );
    }

    #[tokio::test]
    async fn test_consensus_keeps_our_chain_against_shorter_offers() {
        let node = test_node(RecordingNetwork::with_peers(0));

        assert!(!node.consensus(vec![vec![]]).await);
        assert_eq!(node.chain_snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_request_consensus_without_peers_is_a_no_op() {
        let network = RecordingNetwork::with_peers(0);
        let node = test_node(network.clone());

        assert!(!node.request_consensus().await);
        assert!(network.sent().is_empty());
    }

    #[tokio::test]
    async fn test_tick_evicts_stale_transactions_without_mining() {
        let network = RecordingNetwork::with_peers(0);
        let node = test_node(network.clone());

        // 25 hours old: admitted, but stale by the next tick.
        let stale = transfer("alice", 10, unix_now() - 25 * 3600, "sig-old");
        node.submit_transaction(stale, false).await;

        node.tick().await;

        assert!(node.mempool_snapshot().await.is_empty());
        assert!(network.sent().is_empty());
        assert!(!node.is_mining());
    }

    #[tokio::test]
    async fn test_offer_chain_without_a_request_is_ignored() {
        let node = test_node(RecordingNetwork::with_peers(0));
        node.offer_chain(vec![genesis_block()]);

        assert_eq!(node.chain_snapshot().await.len(), 1);
    }
}
