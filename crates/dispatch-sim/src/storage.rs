use bitvec::{bitvec, vec::BitVec};
use bittorrent_peer_protocol::BlockRequest;
use peer_dispatcher::{Piece, PieceStorage, DEFAULT_BLOCK_SIZE};
use rand::seq::IteratorRandom;
use rand::Rng;

use crate::peer::SimPeer;

#[derive(Debug)]
pub struct SimPiece {
    index: u32,
    acquired: BitVec,
    requested: BitVec,
}

impl SimPiece {
    fn new(index: u32, number_of_blocks: usize) -> Self {
        SimPiece {
            index,
            acquired: bitvec![0; number_of_blocks],
            requested: bitvec![0; number_of_blocks],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.acquired.all()
    }

    pub fn has_requested_blocks(&self) -> bool {
        self.requested.any()
    }

    /// Marks the block as downloaded. Returns whether this completed the piece
    pub fn acquire(&mut self, block_index: u32) -> bool {
        let block_index = block_index as usize;
        if block_index >= self.acquired.len() || self.acquired[block_index] {
            return false;
        }

        self.acquired.set(block_index, true);
        self.requested.set(block_index, false);
        self.is_complete()
    }

    fn next_missing_block(&self) -> Option<u32> {
        (0..self.acquired.len())
            .find(|&block_index| !self.acquired[block_index] && !self.requested[block_index])
            .and_then(|block_index| u32::try_from(block_index).ok())
    }
}

impl Piece for SimPiece {
    fn index(&self) -> u32 {
        self.index
    }

    fn cancel_block(&mut self, block_index: u32) {
        if let Some(mut requested) = self.requested.get_mut(block_index as usize) {
            *requested = false;
        }
    }

    fn has_block(&self, block_index: u32) -> bool {
        self.acquired
            .get(block_index as usize)
            .as_deref()
            .is_some_and(|&acquired| acquired)
    }
}

/// Pieces of the simulated torrent. Only tracks which blocks are there, no data is stored.
#[derive(Debug)]
pub struct SimStorage {
    pieces: Vec<SimPiece>,
}

impl SimStorage {
    pub fn new(number_of_pieces: u32, blocks_per_piece: u32) -> Self {
        SimStorage {
            pieces: (0..number_of_pieces)
                .map(|index| SimPiece::new(index, blocks_per_piece as usize))
                .collect(),
        }
    }

    pub fn number_of_pieces(&self) -> u32 {
        self.pieces.len() as u32
    }

    /// Picks the next block to request from the peer and marks it as requested.
    ///
    /// While the peer chokes us only pieces from its allowed fast set are considered.
    pub fn pick_block(&mut self, peer: &SimPeer) -> Option<BlockRequest> {
        self.pieces
            .iter_mut()
            .filter(|piece| !peer.is_choking_us() || peer.is_allowed_fast(piece.index))
            .find_map(|piece| {
                let block_index = piece.next_missing_block()?;
                piece.requested.set(block_index as usize, true);
                Some(BlockRequest {
                    index: piece.index,
                    begin: block_index * DEFAULT_BLOCK_SIZE,
                    length: DEFAULT_BLOCK_SIZE,
                })
            })
    }

    pub fn piece_at_mut(&mut self, index: u32) -> Option<&mut SimPiece> {
        self.pieces.get_mut(index as usize)
    }

    /// Index of a random piece that has requests in flight
    pub fn random_requested_piece<R: Rng>(&self, rng: &mut R) -> Option<u32> {
        self.pieces
            .iter()
            .filter(|piece| piece.has_requested_blocks())
            .map(|piece| piece.index)
            .choose(rng)
    }

    /// Completes a requested block as if another connection downloaded it. The block stays
    /// requested from this peer.
    pub fn acquire_elsewhere<R: Rng>(&mut self, rng: &mut R) -> Option<(u32, u32)> {
        let index = self.random_requested_piece(rng)?;
        let piece = self.pieces.get_mut(index as usize)?;
        let block_index = piece.requested.iter_ones().choose(rng)?;

        piece.acquired.set(block_index, true);
        Some((index, u32::try_from(block_index).ok()?))
    }

    pub fn completed_pieces(&self) -> usize {
        self.pieces.iter().filter(|piece| piece.is_complete()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.pieces.iter().all(SimPiece::is_complete)
    }
}

impl PieceStorage for SimStorage {
    fn piece_mut(&mut self, index: u32) -> Option<&mut dyn Piece> {
        self.pieces
            .get_mut(index as usize)
            .map(|piece| piece as &mut dyn Piece)
    }
}
