//! TCP peer transport
//!
//! Point-to-point frame delivery over plain TCP. The peer directory is
//! seeded from configuration; discovery beyond that belongs to the
//! external overlay. Connections are bidirectional: a peer answering
//! `NeedChain` replies on the connection the request arrived on.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::constants::{CONSENSUS_COLLECT_SECONDS, PEER_SEND_TIMEOUT_SECONDS};
use crate::node::LocalNode;
use crate::p2p::{NodeMessage, ProtocolError, MAX_MESSAGE_SIZE, NETWORK_MAGIC};

/// How long an inbound connection may sit idle before it is closed.
const INBOUND_IDLE: Duration = Duration::from_secs(300);

/// The seam between the node and its transport. Tests substitute a
/// recording implementation.
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    /// Send a message to every known peer. Per-peer failures are logged
    /// and skipped; a broadcast never fails as a whole.
    async fn broadcast(&self, message: NodeMessage);

    /// Number of peers currently in the directory.
    fn peer_count(&self) -> usize;
}

/// Write half of a connection, for replying in place.
#[derive(Clone)]
pub struct Replier {
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl Replier {
    fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write a frame back to the peer this connection belongs to.
    pub async fn send(&self, message: NodeMessage) {
        let frame = message.to_bytes();
        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.write_all(&frame).await {
            warn!(%error, "failed to reply to a peer");
        }
    }
}

#[derive(Debug, Error)]
enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Read one frame off a stream. `Ok(None)` means the peer hung up
/// cleanly between frames.
async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Option<NodeMessage>, FrameError> {
    let mut header = [0u8; 8];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error.into()),
    }

    if header[0..4] != NETWORK_MAGIC {
        return Err(ProtocolError::BadMagic.into());
    }
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if length > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::Oversized(length).into());
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(FrameError::Io)?;
    Ok(Some(NodeMessage::decode_body(&body)?))
}

/// Translate inbound messages into node state-machine calls.
async fn dispatch(node: Arc<LocalNode>, message: NodeMessage, replier: Replier) {
    match message {
        NodeMessage::NewTransaction(transaction) => {
            info!("a peer gave us a new transaction");
            node.submit_transaction(transaction, false).await;
        }
        NodeMessage::NewBlock(block) => {
            info!("a peer gave us a new block");
            if node.accept_block(block).await {
                info!("the peer's block extended our chain");
            } else {
                warn!("the peer's block was rejected");
            }
        }
        NodeMessage::NeedChain => {
            info!("a peer requested our chain");
            let chain = node.chain_snapshot().await;
            replier.send(NodeMessage::ThisIsMyChain(chain)).await;
        }
        NodeMessage::ThisIsMyChain(chain) => {
            debug!(length = chain.len(), "a peer offered us its chain");
            node.offer_chain(chain);
        }
    }
}

/// Read frames until EOF, decode failure, or the idle timeout; each
/// decoded message is dispatched in its own task.
async fn connection_loop(node: Arc<LocalNode>, stream: TcpStream, idle: Duration) {
    let (mut reader, writer) = stream.into_split();
    let replier = Replier::new(writer);

    loop {
        match timeout(idle, read_frame(&mut reader)).await {
            Ok(Ok(Some(message))) => {
                tokio::spawn(dispatch(Arc::clone(&node), message, replier.clone()));
            }
            Ok(Ok(None)) => break,
            Ok(Err(error)) => {
                warn!(%error, "dropping an undecodable peer message");
                break;
            }
            Err(_) => {
                debug!("peer connection idle, closing");
                break;
            }
        }
    }
}

/// TCP transport with a seeded peer directory.
pub struct TcpPeerNetwork {
    peers: StdMutex<Vec<SocketAddr>>,
    node: OnceLock<Weak<LocalNode>>,
}

impl TcpPeerNetwork {
    pub fn new(seed_peers: Vec<SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            peers: StdMutex::new(seed_peers),
            node: OnceLock::new(),
        })
    }

    /// Wire up the node this transport dispatches into. Called once,
    /// right after the node is constructed.
    pub fn attach(&self, node: &Arc<LocalNode>) {
        let _ = self.node.set(Arc::downgrade(node));
    }

    pub fn add_peer(&self, addr: SocketAddr) {
        let mut peers = self.peers.lock().unwrap();
        if !peers.contains(&addr) {
            peers.push(addr);
        }
    }

    fn node(&self) -> Option<Arc<LocalNode>> {
        self.node.get().and_then(Weak::upgrade)
    }

    /// Listen for inbound peer connections on `port`.
    pub async fn serve(self: Arc<Self>, port: u16) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port, "P2P transport listening");
        self.serve_on(listener).await
    }

    /// Listen for inbound peer connections on an existing listener.
    pub async fn serve_on(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            debug!(%peer_addr, "peer connected");

            let Some(node) = self.node() else {
                warn!("transport has no node attached, dropping a connection");
                continue;
            };
            tokio::spawn(connection_loop(node, stream, INBOUND_IDLE));
        }
    }
}

#[async_trait]
impl PeerNetwork for TcpPeerNetwork {
    async fn broadcast(&self, message: NodeMessage) {
        let peers = self.peers.lock().unwrap().clone();
        let frame = message.to_bytes();

        for addr in peers {
            let connect_and_send = async {
                let mut stream = TcpStream::connect(addr).await?;
                stream.write_all(&frame).await?;
                Ok::<TcpStream, std::io::Error>(stream)
            };

            match timeout(
                Duration::from_secs(PEER_SEND_TIMEOUT_SECONDS),
                connect_and_send,
            )
            .await
            {
                Ok(Ok(stream)) => {
                    // Keep the connection open long enough for replies
                    // (a peer answering NeedChain) to come back on it.
                    if let Some(node) = self.node() {
                        let reply_window = Duration::from_secs(CONSENSUS_COLLECT_SECONDS + 2);
                        tokio::spawn(connection_loop(node, stream, reply_window));
                    }
                }
                Ok(Err(error)) => warn!(%addr, %error, "failed to send to a peer, skipping"),
                Err(_) => warn!(%addr, "peer send timed out, skipping"),
            }
        }
    }

    fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }
}
