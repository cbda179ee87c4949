//! EMBER Blockchain Node
//!
//! Main entry point for running an EMBER node.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::time::{interval, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ember_core::constants;
use ember_core::crypto::{self, HttpSignatureOracle};
use ember_core::node::{genesis_block, LocalNode};
use ember_core::p2p::TcpPeerNetwork;
use ember_core::rpc;

const INTRO_MESSAGE: &str = r"
 _____ __  __ ____  _____ ____
| ____|  \/  | __ )| ____|  _ \
|  _| | |\/| |  _ \|  _| | |_) |
| |___| |  | | |_) | |___|  _ <
|_____|_|  |_|____/|_____|_| \_\
";

#[derive(Parser)]
#[command(name = "ember-node", about = "EMBER proof-of-work blockchain node")]
struct Cli {
    /// Public key where this node's mining rewards are sent
    #[arg(long)]
    public_key: String,

    /// Full URL of an ECDSA secp256k1 signature validation server.
    /// Must be reachable at startup.
    #[arg(long)]
    validation_server: String,

    /// Comma-separated addresses of other nodes to bootstrap from
    /// (a bare IP gets the default P2P port appended)
    #[arg(long, value_delimiter = ',')]
    seed_nodes: Vec<String>,

    /// How many peer chains to collect before running consensus
    #[arg(long, default_value_t = constants::MIN_CHAINS_FOR_CONSENSUS)]
    minimum_chains_for_consensus: usize,

    /// P2P listen port
    #[arg(long, default_value_t = constants::PORT_P2P)]
    p2p_port: u16,

    /// Also host JSON endpoints for wallets and explorers
    #[arg(long)]
    json_endpoints: bool,

    /// Port for the JSON endpoints
    #[arg(long, default_value_t = constants::PORT_JSON)]
    json_port: u16,
}

/// Parse seed addresses, appending the default P2P port to bare hosts.
fn parse_seed_nodes(raw: &[String]) -> Vec<SocketAddr> {
    raw.iter()
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            let candidate = if entry.contains(':') {
                entry.to_string()
            } else {
                format!("{}:{}", entry, constants::PORT_P2P)
            };
            match candidate.parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!(seed = entry, "skipping an unparseable seed node address");
                    None
                }
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("{INTRO_MESSAGE}");

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    crypto::probe(&cli.validation_server)
        .await
        .context("your validation server URL is unreachable")?;

    let seed_nodes = parse_seed_nodes(&cli.seed_nodes);
    let network = TcpPeerNetwork::new(seed_nodes);
    let oracle = Arc::new(HttpSignatureOracle::new(cli.validation_server.clone()));

    let node = LocalNode::new(
        genesis_block(),
        cli.public_key,
        cli.minimum_chains_for_consensus,
        oracle,
        network.clone(),
    );
    network.attach(&node);

    // Once a minute: evict stale transactions and attempt to mine.
    // The first firing is skipped so the node can finish bootstrapping.
    let ticker_node = Arc::clone(&node);
    tokio::spawn(async move {
        let mut minute = interval(Duration::from_secs(60));
        minute.tick().await;
        loop {
            minute.tick().await;
            ticker_node.tick().await;
        }
    });

    if cli.json_endpoints {
        let json_node = Arc::clone(&node);
        let json_port = cli.json_port;
        tokio::spawn(async move {
            if let Err(error) = rpc::serve(json_node, json_port).await {
                warn!(%error, "JSON endpoints stopped");
            }
        });
    }

    let listener = tokio::spawn(Arc::clone(&network).serve(cli.p2p_port));

    // Give the listener and seed peers a moment, then sync up.
    let bootstrap_node = Arc::clone(&node);
    tokio::spawn(async move {
        sleep(Duration::from_secs(3)).await;
        info!("requesting initial consensus from seed peers");
        bootstrap_node.request_consensus().await;
    });

    tokio::select! {
        joined = listener => {
            joined?.context("P2P listener failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping node");
        }
    }

    Ok(())
}
