use std::io::{self, Write};

use bittorrent_peer_protocol::{BittorrentP2pMessage, Block, BlockRequest, Encode};
use bytes::BytesMut;

use super::{AbortOutstandingRequestEvent, BoxedMessage, CancelSendingPieceEvent, ChokingEvent, OutboundMessage};
use crate::Result;

/// A peer wire protocol message that is written to the sink in as many passes as needed.
///
/// The message is encoded on its first send. Until the first byte is written it can be
/// invalidated by an event; an invalidated message completes without writing anything.
#[derive(Debug)]
pub struct WireMessage {
    message: BittorrentP2pMessage,
    encoded: Option<BytesMut>,
    written: usize,
    invalidated: bool,
    /// Answer an invalidated piece with a `reject request` (Fast Extension)
    reject_on_invalidate: bool,
}

impl WireMessage {
    pub fn new(message: BittorrentP2pMessage) -> Self {
        WireMessage {
            message,
            encoded: None,
            written: 0,
            invalidated: false,
            reject_on_invalidate: false,
        }
    }

    pub fn piece(block: Block, fast_extension: bool) -> Self {
        WireMessage {
            reject_on_invalidate: fast_extension,
            ..WireMessage::new(BittorrentP2pMessage::Piece(block))
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    fn has_started(&self) -> bool {
        self.written > 0
    }

    /// The block a piece message carries, in the form a request for it has
    fn piece_request(&self) -> Option<BlockRequest> {
        match &self.message {
            BittorrentP2pMessage::Piece(Block { index, begin, block }) => Some(BlockRequest {
                index: *index,
                begin: *begin,
                length: u32::try_from(block.len()).ok()?,
            }),
            _ => None,
        }
    }

    fn invalidate(&mut self) -> Option<BoxedMessage> {
        tracing::trace!(message_id = ?self.message.message_id(), "invalidating a queued message");
        self.invalidated = true;
        self.encoded = None;

        if self.reject_on_invalidate {
            self.piece_request()
                .map(|request| Box::new(WireMessage::new(BittorrentP2pMessage::RejectRequest(request))) as BoxedMessage)
        } else {
            None
        }
    }
}

impl OutboundMessage for WireMessage {
    fn is_uploading(&self) -> bool {
        matches!(self.message, BittorrentP2pMessage::Piece(_))
    }

    fn is_sending_in_progress(&self) -> bool {
        self.encoded
            .as_ref()
            .is_some_and(|encoded| self.written < encoded.len())
    }

    fn send(&mut self, sink: &mut dyn Write) -> Result<()> {
        if self.invalidated && !self.has_started() {
            return Ok(());
        }

        let encoded = match self.encoded.take() {
            Some(encoded) => encoded,
            None => {
                let mut encoded = BytesMut::with_capacity(self.message.encoded_length());
                self.message.encode(&mut encoded)?;
                encoded
            }
        };

        let result = write_nonblocking(sink, &encoded, &mut self.written);
        tracing::trace!(
            message_id = ?self.message.message_id(),
            written = self.written,
            total = encoded.len(),
            "sent message bytes"
        );
        self.encoded = Some(encoded);

        result
    }

    fn on_cancel_sending_piece(&mut self, event: &CancelSendingPieceEvent) -> Option<BoxedMessage> {
        let cancelled = BlockRequest {
            index: event.index,
            begin: event.begin,
            length: event.length,
        };
        if self.invalidated || self.has_started() || self.piece_request() != Some(cancelled) {
            return None;
        }

        self.invalidate()
    }

    fn on_abort_outstanding_request(&mut self, event: &AbortOutstandingRequestEvent) -> Option<BoxedMessage> {
        match self.message {
            BittorrentP2pMessage::Request(BlockRequest { index, .. })
                if index == event.piece_index && !self.invalidated && !self.has_started() =>
            {
                self.invalidated = true;
                self.encoded = None;
                None
            }
            _ => None,
        }
    }

    fn on_choking(&mut self, event: &ChokingEvent<'_>) -> Option<BoxedMessage> {
        let BittorrentP2pMessage::Piece(Block { index, .. }) = self.message else {
            return None;
        };
        // Pieces from the allowed fast set may still be sent to a choked peer
        if self.invalidated || self.has_started() || event.is_allowed_fast(index) {
            return None;
        }

        self.invalidate()
    }
}

/// Writes the rest of `buf` until the sink stops accepting bytes
fn write_nonblocking(sink: &mut dyn Write, buf: &[u8], written: &mut usize) -> Result<()> {
    while *written < buf.len() {
        match sink.write(&buf[*written..]) {
            Ok(0) => break,
            Ok(n) => *written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
