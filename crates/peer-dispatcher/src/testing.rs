//! Collaborators used by the unit tests
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex};

use bitvec::bitvec;
use bitvec::vec::BitVec;

use crate::{
    AbortOutstandingRequestEvent, BandwidthPolicy, BoxedMessage, CancelSendingPieceEvent, ChokingEvent,
    OutboundMessage, Peer, Piece, PieceStorage, Result, TransferStats,
};

pub(crate) const PEER_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881);

#[derive(Debug)]
pub(crate) struct MockPiece {
    pub index: u32,
    pub blocks: BitVec,
    pub cancelled: Vec<u32>,
}

impl MockPiece {
    pub fn new(index: u32, number_of_blocks: usize) -> Self {
        MockPiece {
            index,
            blocks: bitvec![0; number_of_blocks],
            cancelled: Vec::new(),
        }
    }
}

impl Piece for MockPiece {
    fn index(&self) -> u32 {
        self.index
    }

    fn cancel_block(&mut self, block_index: u32) {
        self.cancelled.push(block_index);
    }

    fn has_block(&self, block_index: u32) -> bool {
        self.blocks.get(block_index as usize).as_deref().is_some_and(|&val| val)
    }
}

#[derive(Debug)]
pub(crate) struct MockStorage {
    pieces: Vec<MockPiece>,
}

impl MockStorage {
    pub fn new(number_of_pieces: u32, blocks_per_piece: usize) -> Self {
        MockStorage {
            pieces: (0..number_of_pieces)
                .map(|index| MockPiece::new(index, blocks_per_piece))
                .collect(),
        }
    }

    pub fn piece(&self, index: u32) -> &MockPiece {
        &self.pieces[index as usize]
    }

    pub fn piece_at_mut(&mut self, index: u32) -> &mut MockPiece {
        &mut self.pieces[index as usize]
    }
}

impl PieceStorage for MockStorage {
    fn piece_mut(&mut self, index: u32) -> Option<&mut dyn Piece> {
        self.pieces
            .get_mut(index as usize)
            .map(|piece| piece as &mut dyn Piece)
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockPeer {
    /// Sent to us by the peer
    pub allowed_fast: HashSet<u32>,
    /// Sent by us to the peer
    pub am_allowed_fast: HashSet<u32>,
    pub snubbing: bool,
}

impl MockPeer {
    pub fn with_allowed_fast(pieces: impl IntoIterator<Item = u32>) -> Self {
        MockPeer {
            allowed_fast: pieces.into_iter().collect(),
            ..MockPeer::default()
        }
    }

    pub fn with_am_allowed_fast(mut self, pieces: impl IntoIterator<Item = u32>) -> Self {
        self.am_allowed_fast.extend(pieces);
        self
    }
}

impl Peer for MockPeer {
    fn is_in_peer_allowed_index_set(&self, index: u32) -> bool {
        self.allowed_fast.contains(&index)
    }

    fn is_in_am_allowed_index_set(&self, index: u32) -> bool {
        self.am_allowed_fast.contains(&index)
    }

    fn set_snubbing(&mut self, snubbing: bool) {
        self.snubbing = snubbing;
    }
}

#[derive(Debug, Default)]
pub(crate) struct Throttle {
    pub overall: bool,
    pub torrent: bool,
}

impl BandwidthPolicy for Throttle {
    fn does_overall_upload_speed_exceed(&self) -> bool {
        self.overall
    }

    fn does_upload_speed_exceed(&self) -> bool {
        self.torrent
    }
}

#[derive(Debug, Default)]
pub(crate) struct UploadStats {
    pub updates: Vec<SocketAddrV4>,
}

impl TransferStats for UploadStats {
    fn update_transfer_stat_for(&mut self, peer_addr: SocketAddrV4) {
        self.updates.push(peer_addr);
    }
}

/// Records what happened to [ScriptedMessage]s
#[derive(Debug, Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<JournalEntries>>);

#[derive(Debug, Default)]
pub(crate) struct JournalEntries {
    sent: Vec<String>,
    events: Vec<String>,
}

impl Journal {
    pub fn sent(&self) -> Vec<String> {
        self.0.lock().expect("poisoned journal").sent.clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().expect("poisoned journal").events.clone()
    }

    fn record_send(&self, name: &str) {
        self.0.lock().expect("poisoned journal").sent.push(name.to_owned());
    }

    fn record_event(&self, event: String) {
        self.0.lock().expect("poisoned journal").events.push(event);
    }
}

/// A message that needs `partial_sends + 1` calls to `send` to complete
#[derive(Debug)]
pub(crate) struct ScriptedMessage {
    name: &'static str,
    uploading: bool,
    partial_sends: usize,
    in_progress: bool,
    journal: Journal,
}

impl ScriptedMessage {
    pub fn control(name: &'static str, journal: &Journal) -> BoxedMessage {
        ScriptedMessage::boxed(name, false, 0, journal)
    }

    pub fn upload(name: &'static str, journal: &Journal) -> BoxedMessage {
        ScriptedMessage::boxed(name, true, 0, journal)
    }

    pub fn boxed(name: &'static str, uploading: bool, partial_sends: usize, journal: &Journal) -> BoxedMessage {
        Box::new(ScriptedMessage {
            name,
            uploading,
            partial_sends,
            in_progress: false,
            journal: journal.clone(),
        })
    }
}

impl OutboundMessage for ScriptedMessage {
    fn is_uploading(&self) -> bool {
        self.uploading
    }

    fn is_sending_in_progress(&self) -> bool {
        self.in_progress
    }

    fn send(&mut self, _sink: &mut dyn std::io::Write) -> Result<()> {
        self.journal.record_send(self.name);
        self.in_progress = self.partial_sends > 0;
        self.partial_sends = self.partial_sends.saturating_sub(1);
        Ok(())
    }

    fn on_queued(&mut self) {
        self.journal.record_event(format!("queued {}", self.name));
    }

    fn on_cancel_sending_piece(&mut self, event: &CancelSendingPieceEvent) -> Option<BoxedMessage> {
        self.journal
            .record_event(format!("cancel {} {} {} {}", self.name, event.index, event.begin, event.length));
        None
    }

    fn on_abort_outstanding_request(&mut self, event: &AbortOutstandingRequestEvent) -> Option<BoxedMessage> {
        self.journal
            .record_event(format!("abort {} {}", self.name, event.piece_index));
        None
    }

    fn on_choking(&mut self, _event: &ChokingEvent<'_>) -> Option<BoxedMessage> {
        self.journal.record_event(format!("choking {}", self.name));
        // Uploads answer a local choke with a follow-up message
        self.uploading
            .then(|| ScriptedMessage::control("choke follow-up", &self.journal))
    }
}
