mod p2p_message;

use bytes::Bytes;

pub use p2p_message::{BittorrentP2pMessage, MessageId};

/// Identifies a block of a piece: used by `request`, `cancel` and `reject request` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    /// Zero-based piece index
    pub index: u32,
    /// Zero-based byte offset within the piece
    pub begin: u32,
    /// Requested length in bytes
    pub length: u32,
}

/// A block of piece data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u32,
    pub begin: u32,
    pub block: Bytes,
}
