//! Wallet-facing HTTP server
//!
//! Axum-based JSON endpoints hosted alongside the P2P protocol when the
//! operator asks for them. Submitted transactions go through the same
//! admission path as peer gossip, with broadcast enabled.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::consensus::{Block, Transaction};
use crate::node::LocalNode;
use crate::storage::Utxo;

/// Serve the JSON endpoints on the given port.
pub async fn serve(node: Arc<LocalNode>, port: u16) -> std::io::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ember/newTransaction", post(new_transaction))
        .route("/ember/getChain", get(get_chain))
        .route("/ember/getUTXOs", get(get_utxos))
        .route("/ember/getMemPool", get(get_mempool))
        .layer(cors)
        .with_state(node);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "JSON endpoints listening");
    axum::serve(listener, app).await
}

/// Submit a wallet transaction and gossip it to peers.
async fn new_transaction(
    State(node): State<Arc<LocalNode>>,
    Json(transaction): Json<Transaction>,
) -> Json<serde_json::Value> {
    let received = node.submit_transaction(transaction, true).await;
    Json(serde_json::json!({ "received": received }))
}

async fn get_chain(State(node): State<Arc<LocalNode>>) -> Json<Vec<Block>> {
    Json(node.chain_snapshot().await)
}

async fn get_utxos(State(node): State<Arc<LocalNode>>) -> Json<Utxo> {
    Json(node.utxo_snapshot().await)
}

async fn get_mempool(State(node): State<Arc<LocalNode>>) -> Json<Vec<Transaction>> {
    Json(node.mempool_snapshot().await)
}
