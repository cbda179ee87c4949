//! EMBER Blockchain Core Library
//!
//! A proof-of-work cryptocurrency node with a UTXO balance ledger,
//! gossip-based block and transaction propagation, and longest-valid-chain
//! consensus. Signature verification is delegated to an external oracle.

pub mod consensus;
pub mod crypto;
pub mod storage;
pub mod mining;
pub mod node;
pub mod p2p;
pub mod rpc;

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    /// Coin minted to the miner by each block's coinbase transaction
    pub const COINBASE_REWARD: u64 = 1000;

    /// Reserved sender key that marks a coinbase transaction.
    /// It is never a valid user key.
    pub const COINBASE_SENDER: &str = "0";

    /// Coin minted to the genesis recipient when the chain was created
    pub const INITIAL_SUPPLY: u64 = 100_000_000_000_000;

    /// Difficulty threshold used until the chain is deep enough to retarget
    pub const DIFFICULTY_FLOOR: i64 = 5;

    /// Number of trailing blocks examined when retargeting difficulty
    pub const RETARGET_WINDOW: usize = 10;

    /// Target inter-block spacing in minutes
    pub const TARGET_SPACING_MINUTES: f64 = 10.0;

    /// Age in seconds past which a pending transaction is evicted
    pub const STALE_TX_SECONDS: i64 = 24 * 60 * 60;

    /// Default P2P listen port
    pub const PORT_P2P: u16 = 7000;

    /// Default port for the optional wallet-facing JSON endpoints
    pub const PORT_JSON: u16 = 9000;

    /// How many peer chains a consensus request collects by default
    pub const MIN_CHAINS_FOR_CONSENSUS: usize = 4;

    /// How long a consensus request waits for peer chains before
    /// proceeding with whatever arrived
    pub const CONSENSUS_COLLECT_SECONDS: u64 = 10;

    /// Per-peer timeout when sending a message
    pub const PEER_SEND_TIMEOUT_SECONDS: u64 = 3;

    /// Timeout for a single signature-oracle request
    pub const ORACLE_TIMEOUT_SECONDS: u64 = 10;
}
