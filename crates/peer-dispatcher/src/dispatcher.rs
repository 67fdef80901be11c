use std::io::Write;
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use crate::{
    AbortOutstandingRequestEvent, BandwidthPolicy, BoxedMessage, CancelSendingPieceEvent, DispatcherConfig,
    MessageFactory, OutboundMessageQueue, OutstandingRequestSet, Peer, Piece, PieceStorage, RequestSlot, Result,
    TransferStats,
};

/// Dispatches messages to a single peer and keeps track of the blocks requested from it.
///
/// A dispatcher is driven from the event loop of its connection: [Dispatcher::dispatch] and
/// [Dispatcher::sweep] once per iteration, and the `on_*` handlers when the corresponding protocol
/// event happens. Collaborators are borrowed only for the duration of a call.
///
/// Queueing a request message doesn't register its block as outstanding:
/// [Dispatcher::add_outstanding_request] has to be called as well, or use [Dispatcher::request_block]
/// that does both.
#[derive(Debug)]
pub struct Dispatcher {
    peer_addr: SocketAddrV4,
    request_timeout: Duration,
    request_slots: OutstandingRequestSet,
    message_queue: OutboundMessageQueue,
}

impl Dispatcher {
    pub fn new(peer_addr: SocketAddrV4, config: DispatcherConfig) -> Self {
        Dispatcher {
            peer_addr,
            request_timeout: config.request_timeout,
            request_slots: OutstandingRequestSet::new(),
            message_queue: OutboundMessageQueue::new(),
        }
    }

    pub fn peer_addr(&self) -> SocketAddrV4 {
        self.peer_addr
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn queue_message(&mut self, message: BoxedMessage) {
        self.message_queue.push(message);
    }

    pub fn queue_messages(&mut self, messages: impl IntoIterator<Item = BoxedMessage>) {
        self.message_queue.extend(messages);
    }

    /// Queues a request message and tracks its block as outstanding
    pub fn request_block(&mut self, request: BoxedMessage, slot: RequestSlot) {
        self.queue_message(request);
        self.add_outstanding_request(slot);
    }

    /// Sends queued messages until everything was sent or the sink stopped accepting bytes
    #[tracing::instrument(level = "trace", err, skip_all, fields(peer_addr = %self.peer_addr))]
    pub fn dispatch(
        &mut self,
        sink: &mut dyn Write,
        bandwidth: &dyn BandwidthPolicy,
        stats: &mut dyn TransferStats,
    ) -> Result<()> {
        let peer_addr = self.peer_addr;
        self.message_queue
            .drain(sink, bandwidth, || stats.update_transfer_stat_for(peer_addr))
    }

    /// The remote peer cancelled a block request: don't send the block if it's still queued
    pub fn on_cancel_sending_piece(&mut self, index: u32, begin: u32, length: u32) {
        tracing::trace!(peer_addr = %self.peer_addr, index, begin, length, "cancel sending piece");
        self.message_queue
            .notify_cancel_sending_piece(CancelSendingPieceEvent { index, begin, length });
    }

    /// Does nothing. Queued blocks are cancelled one at a time with [Dispatcher::on_cancel_sending_piece].
    // TODO: drop once no caller needs the whole-piece variant
    pub fn on_cancel_sending_whole_piece(&mut self, _piece: &dyn Piece) {}

    /// We stopped downloading the piece from this peer: drop its outstanding requests and the
    /// request messages for it that weren't sent yet
    #[tracing::instrument(level = "trace", skip_all, fields(peer_addr = %self.peer_addr, index = piece.index()))]
    pub fn on_abort_outstanding_request(&mut self, piece: &mut dyn Piece) {
        let aborted = self.request_slots.abort_for_piece(piece);
        tracing::debug!(aborted, "aborted outstanding requests");

        self.message_queue
            .notify_abort_outstanding_request(AbortOutstandingRequestEvent {
                piece_index: piece.index(),
            });
    }

    /// The remote peer choked us: only requests for pieces from its allowed fast set stay valid
    #[tracing::instrument(level = "trace", skip_all, fields(peer_addr = %self.peer_addr))]
    pub fn on_choked(&mut self, peer: &dyn Peer, pieces: &mut dyn PieceStorage) {
        let removed = self.request_slots.remove_choked_and_not_allowed(peer, pieces);
        tracing::debug!(removed, remaining = self.request_slots.len(), "choked by the peer");
    }

    /// We choked the remote peer: queued pieces outside of our allowed fast set won't be sent
    pub fn on_choking(&mut self, peer: &dyn Peer) {
        tracing::trace!(peer_addr = %self.peer_addr, "choking the peer");
        self.message_queue.notify_choking(peer);
    }

    /// Drops outstanding requests that timed out or whose blocks arrived through another connection
    pub fn sweep(&mut self, peer: &mut dyn Peer, pieces: &mut dyn PieceStorage, factory: &dyn MessageFactory) {
        self.sweep_at(Instant::now(), peer, pieces, factory);
    }

    #[tracing::instrument(level = "trace", skip_all, fields(peer_addr = %self.peer_addr))]
    pub fn sweep_at(
        &mut self,
        now: Instant,
        peer: &mut dyn Peer,
        pieces: &mut dyn PieceStorage,
        factory: &dyn MessageFactory,
    ) {
        let acquired = self
            .request_slots
            .sweep_stale_or_completed(self.request_timeout, now, peer, pieces);

        // The block is already here, tell the peer not to bother
        for slot in acquired {
            self.message_queue
                .push(factory.create_cancel_message(slot.index, slot.begin, slot.length));
        }
    }

    pub fn is_outstanding_request(&self, index: u32, block_index: u32) -> bool {
        self.request_slots.is_outstanding(index, block_index)
    }

    pub fn outstanding_request(&self, index: u32, begin: u32, length: u32) -> Option<&RequestSlot> {
        self.request_slots.get(index, begin, length)
    }

    pub fn add_outstanding_request(&mut self, slot: RequestSlot) {
        if !self.request_slots.add(slot) {
            tracing::trace!(
                peer_addr = %self.peer_addr,
                index = slot.index,
                begin = slot.begin,
                "block is already requested"
            );
        }
    }

    /// Stops tracking the request, cancelling its block
    pub fn remove_outstanding_request(&mut self, slot: &RequestSlot, pieces: &mut dyn PieceStorage) {
        self.request_slots.remove(slot, pieces);
    }

    pub fn count_outstanding_requests(&self) -> usize {
        self.request_slots.len()
    }

    pub fn is_sending_in_progress(&self) -> bool {
        self.message_queue.is_sending_in_progress()
    }

    pub fn count_outstanding_upload(&self) -> usize {
        self.message_queue.count_uploading()
    }

    pub fn count_queued_messages(&self) -> usize {
        self.message_queue.len()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        tracing::trace!(
            peer_addr = %self.peer_addr,
            outstanding = self.request_slots.len(),
            queued = self.message_queue.len(),
            "dispatcher dropped"
        );
    }
}
