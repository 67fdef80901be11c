#[macro_use]
mod macros;
mod error;
mod messages;

use bytes::BufMut;

pub use error::Error;
pub use messages::{BittorrentP2pMessage, Block, BlockRequest, MessageId};

pub type Result<T> = std::result::Result<T, Error>;

pub trait Encode {
    fn encode<B>(&self, dst: &mut B) -> Result<()>
    where
        B: BufMut;
}

pub trait Decode<'a> {
    fn decode(src: &'a [u8]) -> Result<Self>
    where
        Self: Sized;
}
