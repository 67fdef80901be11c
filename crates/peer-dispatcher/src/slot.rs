use std::cmp::Ordering;
use std::time::{Duration, Instant};

use bittorrent_peer_protocol::BlockRequest;

use crate::DEFAULT_BLOCK_SIZE;

/// Orders slots by `(piece index, begin, length)`. Two slots with the same key are the same request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

impl SlotKey {
    pub fn new(index: u32, begin: u32, length: u32) -> Self {
        SlotKey { index, begin, length }
    }

    /// The smallest possible key for a piece: every slot of this piece sorts at or after it
    pub fn first_of(index: u32) -> Self {
        SlotKey::new(index, 0, 0)
    }
}

/// An outstanding request for a single block of a piece
#[derive(Debug, Clone, Copy)]
pub struct RequestSlot {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
    /// Index of the block inside the piece. Derivable from `begin`, but cached
    pub block_index: u32,
    pub requested_at: Instant,
}

impl RequestSlot {
    pub fn new(index: u32, begin: u32, length: u32, block_index: u32) -> Self {
        RequestSlot {
            index,
            begin,
            length,
            block_index,
            requested_at: Instant::now(),
        }
    }

    /// Creates a slot for a request of a block of [DEFAULT_BLOCK_SIZE]
    pub fn for_request(request: &BlockRequest) -> Self {
        RequestSlot::new(
            request.index,
            request.begin,
            request.length,
            request.begin / DEFAULT_BLOCK_SIZE,
        )
    }

    pub fn with_requested_at(mut self, requested_at: Instant) -> Self {
        self.requested_at = requested_at;
        self
    }

    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.index, self.begin, self.length)
    }

    pub fn block_request(&self) -> BlockRequest {
        BlockRequest {
            index: self.index,
            begin: self.begin,
            length: self.length,
        }
    }

    pub fn is_timeout(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.requested_at) >= timeout
    }
}

// Identity and order only depend on the key, never on the block index or the request time
impl PartialEq for RequestSlot {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for RequestSlot {}

impl PartialOrd for RequestSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RequestSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}
