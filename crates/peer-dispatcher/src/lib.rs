mod bandwidth;
mod config;
mod dispatcher;
mod error;
mod message;
mod outstanding;
mod peer;
mod queue;
mod sink;
mod slot;
mod storage;

#[cfg(test)]
mod testing;

pub use bandwidth::BandwidthPolicy;
pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use message::{
    AbortOutstandingRequestEvent, BoxedMessage, CancelSendingPieceEvent, ChokingEvent, MessageFactory,
    OutboundMessage, WireMessage, WireMessageFactory,
};
pub use outstanding::OutstandingRequestSet;
pub use peer::{Peer, TransferStats};
pub use queue::OutboundMessageQueue;
pub use sink::WindowedSink;
pub use slot::{RequestSlot, SlotKey};
pub use storage::{Piece, PieceStorage};

/// Size of a block requested from a peer, except for the last block of the last piece
pub const DEFAULT_BLOCK_SIZE: u32 = 16_384;
