use std::result;

use thiserror::Error;

pub type Result<T> = result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("error while encoding a bittorrent message: {0}")]
    BittorentProtocolError(#[from] bittorrent_peer_protocol::Error),
}
