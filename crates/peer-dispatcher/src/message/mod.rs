mod factory;
mod wire;

use std::fmt::Debug;
use std::io::Write;

use crate::{Peer, Result};

pub use factory::{MessageFactory, WireMessageFactory};
pub use wire::WireMessage;

pub type BoxedMessage = Box<dyn OutboundMessage + Send>;

/// The remote peer cancelled a block request, or we don't want to send the block anymore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelSendingPieceEvent {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

/// We gave up on downloading a piece from this peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortOutstandingRequestEvent {
    pub piece_index: u32,
}

/// We choked the remote peer
#[derive(Clone, Copy)]
pub struct ChokingEvent<'a> {
    peer: &'a dyn Peer,
}

impl<'a> ChokingEvent<'a> {
    pub fn new(peer: &'a dyn Peer) -> Self {
        ChokingEvent { peer }
    }

    /// Whether the piece is in the allowed fast set we gave to the peer, as of now
    pub fn is_allowed_fast(&self, index: u32) -> bool {
        self.peer.is_in_am_allowed_index_set(index)
    }
}

impl Debug for ChokingEvent<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChokingEvent").finish_non_exhaustive()
    }
}

/// A message waiting in the outbound queue of a connection.
///
/// Event hooks default to doing nothing. A hook may answer an event with a follow-up message,
/// which is queued after the event has been delivered to every message.
pub trait OutboundMessage: Debug {
    /// Whether this message carries piece data to the peer
    fn is_uploading(&self) -> bool;

    /// Whether the message was partially written and has to be sent again before anything else
    fn is_sending_in_progress(&self) -> bool;

    /// Writes as much of the message as the sink accepts. Must not block.
    fn send(&mut self, sink: &mut dyn Write) -> Result<()>;

    fn on_queued(&mut self) {}

    fn on_cancel_sending_piece(&mut self, _event: &CancelSendingPieceEvent) -> Option<BoxedMessage> {
        None
    }

    fn on_abort_outstanding_request(&mut self, _event: &AbortOutstandingRequestEvent) -> Option<BoxedMessage> {
        None
    }

    fn on_choking(&mut self, _event: &ChokingEvent<'_>) -> Option<BoxedMessage> {
        None
    }
}
