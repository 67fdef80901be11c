/// A piece that is being downloaded. Pieces are owned by the piece storage; the dispatcher only
/// borrows them to cancel or check single blocks.
pub trait Piece {
    fn index(&self) -> u32;
    /// Marks the block as no longer being fetched, so it can be requested again from any connection
    fn cancel_block(&mut self, block_index: u32);
    fn has_block(&self, block_index: u32) -> bool;
}

pub trait PieceStorage {
    /// Returns `None` if the storage doesn't track this piece (anymore)
    fn piece_mut(&mut self, index: u32) -> Option<&mut dyn Piece>;
}
