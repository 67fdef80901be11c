use thiserror::Error;

use crate::MessageId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("an error happened when converting a value: {0}")]
    ConversionError(&'static str),
    #[error("expected at least {1} bytes while got {0}")]
    BadLength(usize, usize),
    #[error("a {0:?} message must have a length prefix of {2} while got {1}")]
    BadPayloadLength(MessageId, usize, usize),
    #[error("a message of {0} bytes doesn't fit into a u32 length prefix")]
    MessageTooLarge(usize),
}
