use std::collections::{HashMap, HashSet};
use std::net::SocketAddrV4;

use peer_dispatcher::{Peer, TransferStats};

/// What we know about the simulated remote peer
#[derive(Debug, Default)]
pub struct SimPeer {
    /// Pieces the peer allows us to request while it chokes us
    allowed_fast: HashSet<u32>,
    /// Pieces we allow the peer to request while we choke it
    am_allowed_fast: HashSet<u32>,
    choking_us: bool,
    snubbing: bool,
}

impl SimPeer {
    pub fn allow_fast(&mut self, index: u32) {
        self.allowed_fast.insert(index);
    }

    pub fn is_allowed_fast(&self, index: u32) -> bool {
        self.allowed_fast.contains(&index)
    }

    pub fn allow_fast_for_remote(&mut self, index: u32) {
        self.am_allowed_fast.insert(index);
    }

    pub fn is_am_allowed_fast(&self, index: u32) -> bool {
        self.am_allowed_fast.contains(&index)
    }

    pub fn is_choking_us(&self) -> bool {
        self.choking_us
    }

    pub fn set_choking_us(&mut self, choking: bool) {
        self.choking_us = choking;
    }

    pub fn is_snubbing(&self) -> bool {
        self.snubbing
    }
}

impl Peer for SimPeer {
    fn is_in_peer_allowed_index_set(&self, index: u32) -> bool {
        self.is_allowed_fast(index)
    }

    fn is_in_am_allowed_index_set(&self, index: u32) -> bool {
        self.is_am_allowed_fast(index)
    }

    fn set_snubbing(&mut self, snubbing: bool) {
        if snubbing && !self.snubbing {
            tracing::info!("peer is snubbing us");
        }
        self.snubbing = snubbing;
    }
}

/// Counts the passes that sent piece data, per peer
#[derive(Debug, Default)]
pub struct UploadStats {
    upload_passes: HashMap<SocketAddrV4, u64>,
}

impl UploadStats {
    pub fn upload_passes(&self, peer_addr: SocketAddrV4) -> u64 {
        self.upload_passes.get(&peer_addr).copied().unwrap_or_default()
    }
}

impl TransferStats for UploadStats {
    fn update_transfer_stat_for(&mut self, peer_addr: SocketAddrV4) {
        *self.upload_passes.entry(peer_addr).or_default() += 1;
    }
}
