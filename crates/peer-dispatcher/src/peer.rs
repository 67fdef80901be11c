use std::net::SocketAddrV4;

/// The remote side of the connection
pub trait Peer {
    /// Whether the piece is in the allowed fast set the remote peer sent us
    fn is_in_peer_allowed_index_set(&self, index: u32) -> bool;
    /// Whether the piece is in the allowed fast set we sent to the remote peer
    fn is_in_am_allowed_index_set(&self, index: u32) -> bool;
    /// Marks the peer as (un)responsive. Advisory, used when picking peers to drop
    fn set_snubbing(&mut self, snubbing: bool);
}

/// Receives a notification every time a piece message was (partially) sent to a peer
pub trait TransferStats {
    fn update_transfer_stat_for(&mut self, peer_addr: SocketAddrV4);
}
