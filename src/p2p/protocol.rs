//! P2P protocol messages
//!
//! One envelope for everything peers say to each other. The frame
//! layout is stable across versions: network magic, little-endian
//! payload length, an explicit tag byte, then a bincode body.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consensus::{Block, Transaction};

/// Network magic bytes (identifies the EMBER network)
pub const NETWORK_MAGIC: [u8; 4] = *b"EMBR";

/// Maximum frame body size (4 MB)
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

const TAG_NEW_BLOCK: u8 = 0;
const TAG_NEW_TRANSACTION: u8 = 1;
const TAG_THIS_IS_MY_CHAIN: u8 = 2;
const TAG_NEED_CHAIN: u8 = 3;

/// P2P message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeMessage {
    /// A freshly mined block
    NewBlock(Block),
    /// A transaction looking for a block
    NewTransaction(Transaction),
    /// A full chain, answering `NeedChain`
    ThisIsMyChain(Vec<Block>),
    /// Request for the receiver's chain
    NeedChain,
}

/// Codec errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is too short")]
    Truncated,
    #[error("bad network magic")]
    BadMagic,
    #[error("frame of {0} bytes exceeds the message size limit")]
    Oversized(usize),
    #[error("frame carries no message tag")]
    MissingTag,
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    #[error("payload failed to decode: {0}")]
    Payload(#[from] bincode::Error),
}

impl NodeMessage {
    /// Wire discriminator for this message kind.
    pub fn message_type(&self) -> u8 {
        match self {
            NodeMessage::NewBlock(_) => TAG_NEW_BLOCK,
            NodeMessage::NewTransaction(_) => TAG_NEW_TRANSACTION,
            NodeMessage::ThisIsMyChain(_) => TAG_THIS_IS_MY_CHAIN,
            NodeMessage::NeedChain => TAG_NEED_CHAIN,
        }
    }

    /// Encode as a full frame: magic, body length, tag byte, payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = match self {
            NodeMessage::NewBlock(block) => bincode::serialize(block),
            NodeMessage::NewTransaction(transaction) => bincode::serialize(transaction),
            NodeMessage::ThisIsMyChain(chain) => bincode::serialize(chain),
            NodeMessage::NeedChain => Ok(Vec::new()),
        }
        .unwrap_or_default();

        let mut bytes = Vec::with_capacity(4 + 4 + 1 + payload.len());
        bytes.extend_from_slice(&NETWORK_MAGIC);
        bytes.extend_from_slice(&((payload.len() + 1) as u32).to_le_bytes());
        bytes.push(self.message_type());
        bytes.extend_from_slice(&payload);
        bytes
    }

    /// Decode a full frame produced by [`NodeMessage::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < 8 {
            return Err(ProtocolError::Truncated);
        }
        if bytes[0..4] != NETWORK_MAGIC {
            return Err(ProtocolError::BadMagic);
        }

        let length = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::Oversized(length));
        }
        if bytes.len() < 8 + length {
            return Err(ProtocolError::Truncated);
        }

        Self::decode_body(&bytes[8..8 + length])
    }

    /// Decode a frame body: tag byte plus bincode payload.
    pub(crate) fn decode_body(body: &[u8]) -> Result<Self, ProtocolError> {
        let (&tag, payload) = body.split_first().ok_or(ProtocolError::MissingTag)?;
        match tag {
            TAG_NEW_BLOCK => Ok(NodeMessage::NewBlock(bincode::deserialize(payload)?)),
            TAG_NEW_TRANSACTION => {
                Ok(NodeMessage::NewTransaction(bincode::deserialize(payload)?))
            }
            TAG_THIS_IS_MY_CHAIN => {
                Ok(NodeMessage::ThisIsMyChain(bincode::deserialize(payload)?))
            }
            TAG_NEED_CHAIN => Ok(NodeMessage::NeedChain),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}
