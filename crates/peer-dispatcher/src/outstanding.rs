use std::ops::Range;
use std::time::{Duration, Instant};

use crate::slot::{RequestSlot, SlotKey};
use crate::{Peer, Piece, PieceStorage};

/// Block requests that were sent to a peer and are still waiting for an answer.
///
/// Slots are kept in a vector sorted by [SlotKey] without duplicates, so key lookups are binary
/// searches and all slots of a piece form one contiguous range.
///
/// Lookups by `(piece index, block index)` scan the range of the piece instead of maintaining a
/// second index: the range is bounded by the number of blocks requested from this peer, which is
/// small, and the lookup is much rarer than insertions and removals.
#[derive(Debug, Default)]
pub struct OutstandingRequestSet {
    slots: Vec<RequestSlot>,
}

impl OutstandingRequestSet {
    pub fn new() -> Self {
        OutstandingRequestSet::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RequestSlot> {
        self.slots.iter()
    }

    /// Inserts the slot unless a slot with the same key is already present.
    ///
    /// Returns whether the slot was inserted.
    pub fn add(&mut self, slot: RequestSlot) -> bool {
        match self.position(slot.key()) {
            Ok(_) => false,
            Err(insert_at) => {
                self.slots.insert(insert_at, slot);
                true
            }
        }
    }

    /// Removes the slot with the same key and cancels its block in the owning piece
    pub fn remove(&mut self, slot: &RequestSlot, pieces: &mut dyn PieceStorage) -> Option<RequestSlot> {
        let position = self.position(slot.key()).ok()?;
        let removed = self.slots.remove(position);

        tracing::debug!(
            index = removed.index,
            block_index = removed.block_index,
            begin = removed.begin,
            "deleting request slot"
        );
        cancel_block(pieces, &removed);

        Some(removed)
    }

    pub fn is_outstanding(&self, index: u32, block_index: u32) -> bool {
        self.slots[self.piece_range(index)]
            .iter()
            .any(|slot| slot.block_index == block_index)
    }

    pub fn get(&self, index: u32, begin: u32, length: u32) -> Option<&RequestSlot> {
        self.position(SlotKey::new(index, begin, length))
            .ok()
            .map(|position| &self.slots[position])
    }

    /// Removes all slots of the piece, cancelling each of their blocks
    pub fn abort_for_piece(&mut self, piece: &mut dyn Piece) -> usize {
        let range = self.piece_range(piece.index());
        let aborted = range.len();

        for slot in self.slots.drain(range) {
            tracing::debug!(
                index = slot.index,
                block_index = slot.block_index,
                begin = slot.begin,
                "deleting request slot: piece aborted"
            );
            piece.cancel_block(slot.block_index);
        }

        aborted
    }

    /// Drops every slot of a piece that is not in the peer's allowed fast set, cancelling its block
    pub fn remove_choked_and_not_allowed(&mut self, peer: &dyn Peer, pieces: &mut dyn PieceStorage) -> usize {
        let before = self.slots.len();

        self.slots.retain(|slot| {
            if peer.is_in_peer_allowed_index_set(slot.index) {
                return true;
            }

            tracing::debug!(
                index = slot.index,
                block_index = slot.block_index,
                begin = slot.begin,
                "deleting request slot: choked"
            );
            cancel_block(pieces, slot);
            false
        });

        before - self.slots.len()
    }

    /// Drops slots that timed out or whose block was already acquired through another connection.
    ///
    /// Timed out blocks are cancelled and the peer is marked as snubbing. Acquired blocks are not
    /// cancelled; they are returned so that the caller can tell the peer we don't need them anymore.
    pub fn sweep_stale_or_completed(
        &mut self,
        timeout: Duration,
        now: Instant,
        peer: &mut dyn Peer,
        pieces: &mut dyn PieceStorage,
    ) -> Vec<RequestSlot> {
        let mut acquired = Vec::new();

        self.slots.retain(|slot| {
            if slot.is_timeout(timeout, now) {
                tracing::debug!(
                    index = slot.index,
                    block_index = slot.block_index,
                    begin = slot.begin,
                    "deleting request slot: timeout"
                );
                cancel_block(pieces, slot);
                peer.set_snubbing(true);
                return false;
            }

            let has_block = pieces
                .piece_mut(slot.index)
                .is_some_and(|piece| piece.has_block(slot.block_index));
            if has_block {
                tracing::debug!(
                    index = slot.index,
                    block_index = slot.block_index,
                    begin = slot.begin,
                    "deleting request slot: block acquired"
                );
                acquired.push(*slot);
                return false;
            }

            true
        });

        acquired
    }

    fn position(&self, key: SlotKey) -> std::result::Result<usize, usize> {
        self.slots.binary_search_by(|slot| slot.key().cmp(&key))
    }

    /// Range of the slots of a piece: from the first key of the piece up to the first key of the next one
    fn piece_range(&self, index: u32) -> Range<usize> {
        let first = self.slots.partition_point(|slot| slot.key() < SlotKey::first_of(index));
        let last = match index.checked_add(1) {
            Some(next) => self.slots.partition_point(|slot| slot.key() < SlotKey::first_of(next)),
            None => self.slots.len(),
        };

        first..last
    }
}

fn cancel_block(pieces: &mut dyn PieceStorage, slot: &RequestSlot) {
    match pieces.piece_mut(slot.index) {
        Some(piece) => piece.cancel_block(slot.block_index),
        None => tracing::warn!(index = slot.index, "request slot refers to a piece unknown to the storage"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPeer, MockPiece, MockStorage};
    use crate::DEFAULT_BLOCK_SIZE;

    fn slot(index: u32, block_index: u32) -> RequestSlot {
        RequestSlot::new(
            index,
            block_index * DEFAULT_BLOCK_SIZE,
            DEFAULT_BLOCK_SIZE,
            block_index,
        )
    }

    fn keys(set: &OutstandingRequestSet) -> Vec<(u32, u32)> {
        set.iter().map(|slot| (slot.index, slot.block_index)).collect()
    }

    fn assert_sorted(set: &OutstandingRequestSet) {
        let slots: Vec<_> = set.iter().map(|slot| slot.key()).collect();
        assert!(slots.windows(2).all(|pair| pair[0] < pair[1]), "slots are not sorted: {:?}", slots);
    }

    #[test]
    fn add_keeps_slots_sorted_and_unique() {
        let mut set = OutstandingRequestSet::new();
        for (index, block) in [(2, 1), (0, 3), (2, 0), (0, 3), (1, 0), (2, 1), (0, 0)] {
            set.add(slot(index, block));
            assert_sorted(&set);
        }

        assert_eq!(keys(&set), vec![(0, 0), (0, 3), (1, 0), (2, 0), (2, 1)]);
    }

    #[test]
    fn add_of_an_existing_key_is_ignored() {
        let mut set = OutstandingRequestSet::new();
        let now = Instant::now();
        assert!(set.add(slot(0, 1).with_requested_at(now)));
        assert!(!set.add(slot(0, 1).with_requested_at(now + Duration::from_secs(10))));

        assert_eq!(set.len(), 1);
        let kept = set
            .get(0, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_SIZE)
            .expect("slot should be outstanding");
        assert_eq!(kept.requested_at, now);
    }

    #[test]
    fn get_finds_by_exact_key() {
        let mut set = OutstandingRequestSet::new();
        set.add(slot(1, 2));

        assert!(set.get(1, 2 * DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_SIZE).is_some());
        assert!(set.get(1, 2 * DEFAULT_BLOCK_SIZE, 100).is_none());
        assert!(set.get(1, 0, DEFAULT_BLOCK_SIZE).is_none());
        assert!(set.get(0, 2 * DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_SIZE).is_none());
    }

    #[test]
    fn is_outstanding_looks_up_by_block_index() {
        let mut set = OutstandingRequestSet::new();
        set.add(slot(0, 0));
        set.add(slot(0, 2));
        set.add(slot(3, 1));

        assert!(set.is_outstanding(0, 0));
        assert!(set.is_outstanding(0, 2));
        assert!(set.is_outstanding(3, 1));
        assert!(!set.is_outstanding(0, 1));
        assert!(!set.is_outstanding(1, 0));
        assert!(!set.is_outstanding(3, 0));
    }

    #[test]
    fn remove_cancels_the_block() {
        let mut storage = MockStorage::new(2, 4);
        let mut set = OutstandingRequestSet::new();
        set.add(slot(1, 3));
        set.add(slot(1, 1));

        let removed = set.remove(&slot(1, 3), &mut storage).expect("slot should be removed");
        assert_eq!(removed.block_index, 3);
        assert_eq!(storage.piece(1).cancelled, vec![3]);
        assert_eq!(keys(&set), vec![(1, 1)]);

        // Removing it again is a no-op
        assert!(set.remove(&slot(1, 3), &mut storage).is_none());
        assert_eq!(storage.piece(1).cancelled, vec![3]);
    }

    #[test]
    fn remove_of_a_slot_with_unknown_piece_still_drops_it() {
        let mut storage = MockStorage::new(1, 1);
        let mut set = OutstandingRequestSet::new();
        set.add(slot(5, 0));

        assert!(set.remove(&slot(5, 0), &mut storage).is_some());
        assert!(set.is_empty());
    }

    #[test]
    fn abort_for_piece_removes_exactly_that_piece() {
        let mut set = OutstandingRequestSet::new();
        for (index, block) in [(0, 0), (0, 1), (0, 2), (1, 0), (2, 4), (2, 5)] {
            set.add(slot(index, block));
        }

        let mut piece = MockPiece::new(0, 4);
        assert_eq!(set.abort_for_piece(&mut piece), 3);
        assert_eq!(piece.cancelled, vec![0, 1, 2]);
        assert_eq!(keys(&set), vec![(1, 0), (2, 4), (2, 5)]);

        let mut piece = MockPiece::new(2, 8);
        assert_eq!(set.abort_for_piece(&mut piece), 2);
        assert_eq!(piece.cancelled, vec![4, 5]);
        assert_eq!(keys(&set), vec![(1, 0)]);
    }

    #[test]
    fn abort_for_piece_without_slots_is_a_no_op() {
        let mut set = OutstandingRequestSet::new();
        set.add(slot(1, 0));

        let mut piece = MockPiece::new(7, 1);
        assert_eq!(set.abort_for_piece(&mut piece), 0);
        assert!(piece.cancelled.is_empty());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn abort_for_the_last_possible_piece_index() {
        let mut set = OutstandingRequestSet::new();
        set.add(slot(u32::MAX, 0));
        set.add(slot(u32::MAX - 1, 0));

        let mut piece = MockPiece::new(u32::MAX, 1);
        assert_eq!(set.abort_for_piece(&mut piece), 1);
        assert_eq!(keys(&set), vec![(u32::MAX - 1, 0)]);
    }

    #[test]
    fn choke_keeps_only_allowed_fast_pieces() {
        let mut storage = MockStorage::new(4, 4);
        let peer = MockPeer::with_allowed_fast([1, 3]);
        let mut set = OutstandingRequestSet::new();
        for (index, block) in [(0, 0), (1, 0), (1, 1), (2, 2), (3, 0)] {
            set.add(slot(index, block));
        }

        assert_eq!(set.remove_choked_and_not_allowed(&peer, &mut storage), 2);
        assert_eq!(keys(&set), vec![(1, 0), (1, 1), (3, 0)]);
        assert_eq!(storage.piece(0).cancelled, vec![0]);
        assert_eq!(storage.piece(2).cancelled, vec![2]);
        assert!(storage.piece(1).cancelled.is_empty());
        assert!(storage.piece(3).cancelled.is_empty());
    }

    #[test]
    fn sweep_drops_timed_out_and_acquired_slots() {
        let requested_at = Instant::now();
        let timeout = Duration::from_secs(60);
        let mut storage = MockStorage::new(3, 4);
        let mut peer = MockPeer::default();
        storage.piece_at_mut(1).blocks.set(2, true);

        let mut set = OutstandingRequestSet::new();
        set.add(slot(0, 0).with_requested_at(requested_at));
        set.add(slot(1, 2).with_requested_at(requested_at + Duration::from_secs(30)));
        set.add(slot(2, 1).with_requested_at(requested_at + Duration::from_secs(30)));

        let acquired = set.sweep_stale_or_completed(timeout, requested_at + timeout, &mut peer, &mut storage);

        assert_eq!(acquired.len(), 1);
        assert_eq!(acquired[0].key(), slot(1, 2).key());
        assert_eq!(keys(&set), vec![(2, 1)]);
        assert!(peer.snubbing);
        assert_eq!(storage.piece(0).cancelled, vec![0]);
        // An acquired block is not cancelled, the piece already has it
        assert!(storage.piece(1).cancelled.is_empty());
    }

    #[test]
    fn sweep_leaves_fresh_slots_alone() {
        let requested_at = Instant::now();
        let mut storage = MockStorage::new(1, 4);
        let mut peer = MockPeer::default();
        let mut set = OutstandingRequestSet::new();
        set.add(slot(0, 0).with_requested_at(requested_at));
        set.add(slot(0, 1).with_requested_at(requested_at));

        let acquired = set.sweep_stale_or_completed(
            Duration::from_secs(60),
            requested_at + Duration::from_secs(1),
            &mut peer,
            &mut storage,
        );

        assert!(acquired.is_empty());
        assert_eq!(set.len(), 2);
        assert!(!peer.snubbing);
    }
}
