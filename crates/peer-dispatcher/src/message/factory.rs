use bittorrent_peer_protocol::{BittorrentP2pMessage, Block, BlockRequest};

use super::{BoxedMessage, WireMessage};

/// Builds the messages the dispatcher itself has to queue
pub trait MessageFactory {
    fn create_cancel_message(&self, index: u32, begin: u32, length: u32) -> BoxedMessage;
}

/// Creates [WireMessage]s for a single connection
#[derive(Debug, Clone, Default)]
pub struct WireMessageFactory {
    /// Whether both sides support the Fast Extension
    fast_extension: bool,
}

impl WireMessageFactory {
    pub fn new(fast_extension: bool) -> Self {
        WireMessageFactory { fast_extension }
    }

    pub fn create_message(&self, message: BittorrentP2pMessage) -> BoxedMessage {
        match message {
            BittorrentP2pMessage::Piece(block) => self.create_piece_message(block),
            message => Box::new(WireMessage::new(message)),
        }
    }

    pub fn create_request_message(&self, request: BlockRequest) -> BoxedMessage {
        Box::new(WireMessage::new(BittorrentP2pMessage::Request(request)))
    }

    pub fn create_piece_message(&self, block: Block) -> BoxedMessage {
        Box::new(WireMessage::piece(block, self.fast_extension))
    }

    pub fn create_choke_message(&self) -> BoxedMessage {
        Box::new(WireMessage::new(BittorrentP2pMessage::Choke))
    }

    pub fn create_unchoke_message(&self) -> BoxedMessage {
        Box::new(WireMessage::new(BittorrentP2pMessage::Unchoke))
    }

    pub fn create_interested_message(&self, interested: bool) -> BoxedMessage {
        let message = if interested {
            BittorrentP2pMessage::Interested
        } else {
            BittorrentP2pMessage::NotInterested
        };
        Box::new(WireMessage::new(message))
    }

    pub fn create_have_message(&self, index: u32) -> BoxedMessage {
        Box::new(WireMessage::new(BittorrentP2pMessage::Have(index)))
    }

    pub fn create_keep_alive_message(&self) -> BoxedMessage {
        Box::new(WireMessage::new(BittorrentP2pMessage::KeepAlive))
    }
}

impl MessageFactory for WireMessageFactory {
    fn create_cancel_message(&self, index: u32, begin: u32, length: u32) -> BoxedMessage {
        Box::new(WireMessage::new(BittorrentP2pMessage::Cancel(BlockRequest {
            index,
            begin,
            length,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPeer;
    use crate::{ChokingEvent, OutboundMessage, WindowedSink};
    use bytes::Bytes;

    #[test]
    fn only_piece_messages_are_uploads() {
        let factory = WireMessageFactory::new(false);
        let block = Block {
            index: 0,
            begin: 0,
            block: Bytes::from_static(b"x"),
        };

        assert!(factory.create_piece_message(block.clone()).is_uploading());
        assert!(factory.create_message(BittorrentP2pMessage::Piece(block)).is_uploading());
        assert!(!factory.create_cancel_message(0, 0, 1).is_uploading());
        assert!(!factory.create_choke_message().is_uploading());
    }

    #[test]
    fn allowed_fast_pieces_are_sent_after_a_choke() {
        let factory = WireMessageFactory::new(true);
        let peer = MockPeer::default().with_am_allowed_fast([9]);
        let block = |index| Block {
            index,
            begin: 0,
            block: Bytes::from_static(b"abc"),
        };

        let mut allowed = factory.create_piece_message(block(9));
        let mut choked = factory.create_piece_message(block(8));
        let event = ChokingEvent::new(&peer);
        assert!(allowed.on_choking(&event).is_none());
        let reject = choked.on_choking(&event);
        assert!(reject.is_some());

        let mut sink = WindowedSink::new(1024);
        allowed.send(&mut sink).expect("send failed");
        choked.send(&mut sink).expect("send failed");
        let sent = BittorrentP2pMessage::decode_frames(sink.written()).expect("malformed frames");
        assert_eq!(sent, vec![BittorrentP2pMessage::Piece(block(9))]);
    }
}
