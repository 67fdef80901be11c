use crate::{Block, BlockRequest, Decode, Encode, Error, Result};
use bitvec::order::Msb0;
use bitvec::vec::BitVec;
use bytes::{Buf, BufMut};
use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
    // Fast Extension (BEP 6)
    SuggestPiece = 0x0D,
    HaveAll = 0x0E,
    HaveNone = 0x0F,
    RejectRequest = 0x10,
    AllowedFast = 0x11,
}

impl TryFrom<u8> for MessageId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Choke,
            1 => Self::Unchoke,
            2 => Self::Interested,
            3 => Self::NotInterested,
            4 => Self::Have,
            5 => Self::Bitfield,
            6 => Self::Request,
            7 => Self::Piece,
            8 => Self::Cancel,
            9 => Self::Port,
            0x0D => Self::SuggestPiece,
            0x0E => Self::HaveAll,
            0x0F => Self::HaveNone,
            0x10 => Self::RejectRequest,
            0x11 => Self::AllowedFast,
            _ => return Err(Error::ConversionError("MessageId is out of range")),
        })
    }
}

impl MessageId {
    /// Length prefix of messages with a fixed-size payload, message id included
    pub fn fixed_length(&self) -> Option<usize> {
        use MessageId::*;
        match self {
            Choke | Unchoke | Interested | NotInterested | HaveAll | HaveNone => Some(1),
            Have | SuggestPiece | AllowedFast => Some(5),
            Request | Cancel | RejectRequest => Some(13),
            Port => Some(3),
            Bitfield | Piece => None,
        }
    }
}

/// Represents all possible `Peer Wire Protocol` messages, including the ones added by the Fast Extension
/// [Source](https://wiki.theory.org/BitTorrentSpecification#request:_.3Clen.3D0013.3E.3Cid.3D6.3E.3Cindex.3E.3Cbegin.3E.3Clength.3E)
#[derive(Debug, Clone, PartialEq)]
pub enum BittorrentP2pMessage {
    /// The keep-alive message is a message with zero bytes, specified with the length prefix set to zero.
    /// There is no message ID and no payload.
    KeepAlive,
    /// When a peer chokes the client, it is a notification that no requests will be answered until the client is unchoked.
    /// The client should consider all pending (unanswered) requests to be discarded by the remote peer,
    /// except the ones for pieces from the allowed fast set.
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    /// The payload is the zero-based index of a piece that has just been successfully downloaded and verified via the hash.
    Have(u32),
    /// The payload is a bitfield representing the pieces that have been successfully downloaded.
    /// The high bit in the first byte corresponds to piece index 0.
    Bitfield(BitVec<u8, Msb0>),
    /// Requests a single block
    Request(BlockRequest),
    /// A single block of data
    Piece(Block),
    /// Cancels a previously sent block request. The payload is identical to that of the [BittorrentP2pMessage::Request] message.
    Cancel(BlockRequest),
    /// The listen port of the peer's DHT node
    Port(u16),
    /// Advisory: the sender suggests downloading this piece
    SuggestPiece(u32),
    HaveAll,
    HaveNone,
    /// Tells the requester that a block request won't be served
    RejectRequest(BlockRequest),
    /// The receiver may request this piece even while choked
    AllowedFast(u32),
}

impl BittorrentP2pMessage {
    pub const FIXED_PART_LENGTH: usize = 4 /* length */;

    pub fn message_id(&self) -> Option<MessageId> {
        use BittorrentP2pMessage::*;

        Some(match self {
            KeepAlive => return None,
            Choke => MessageId::Choke,
            Unchoke => MessageId::Unchoke,
            Interested => MessageId::Interested,
            NotInterested => MessageId::NotInterested,
            Have(_) => MessageId::Have,
            Bitfield(_) => MessageId::Bitfield,
            Request(_) => MessageId::Request,
            Piece(_) => MessageId::Piece,
            Cancel(_) => MessageId::Cancel,
            Port(_) => MessageId::Port,
            SuggestPiece(_) => MessageId::SuggestPiece,
            HaveAll => MessageId::HaveAll,
            HaveNone => MessageId::HaveNone,
            RejectRequest(_) => MessageId::RejectRequest,
            AllowedFast(_) => MessageId::AllowedFast,
        })
    }

    /// Length of the message without the length prefix
    pub fn payload_length(&self) -> usize {
        use BittorrentP2pMessage::*;

        match self {
            KeepAlive => 0,
            Choke | Unchoke | Interested | NotInterested | HaveAll | HaveNone => 1,
            Have(_) | SuggestPiece(_) | AllowedFast(_) => 5,
            Bitfield(bitvec) => 1 + bitvec.as_raw_slice().len(),
            Request(_) | Cancel(_) | RejectRequest(_) => 13,
            Piece(Block { block, .. }) => 9 + block.len(),
            Port(_) => 3,
        }
    }

    /// Full length of the encoded message, including the length prefix
    pub fn encoded_length(&self) -> usize {
        Self::FIXED_PART_LENGTH + self.payload_length()
    }

    /// Decodes all complete messages that are stored back to back in `src`
    pub fn decode_frames(src: &[u8]) -> Result<Vec<Self>> {
        let mut messages = Vec::new();
        let mut offset = 0;
        while offset < src.len() {
            let frame = &src[offset..];
            check_length!(frame.len(), Self::FIXED_PART_LENGTH);

            let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
            let frame_length = Self::FIXED_PART_LENGTH
                + usize::try_from(length)
                    .map_err(|_| Error::ConversionError("error when converting BitTorrent message length to usize"))?;
            check_length!(frame.len(), frame_length);

            messages.push(Self::decode(&frame[..frame_length])?);
            offset += frame_length;
        }

        Ok(messages)
    }
}

impl Encode for BittorrentP2pMessage {
    fn encode<B>(&self, dst: &mut B) -> Result<()>
    where
        B: BufMut,
    {
        use BittorrentP2pMessage::*;

        let payload_length = self.payload_length();
        let length = u32::try_from(payload_length).map_err(|_| Error::MessageTooLarge(payload_length))?;

        dst.put_u32(length);

        if let Some(message_id) = self.message_id() {
            dst.put_u8(message_id as u8);
        }

        match self {
            // These message types have no additional info
            KeepAlive | Choke | Unchoke | Interested | NotInterested | HaveAll | HaveNone => {}
            Have(piece_idx) | SuggestPiece(piece_idx) | AllowedFast(piece_idx) => dst.put_u32(*piece_idx),
            Bitfield(bitfield) => dst.put_slice(bitfield.as_raw_slice()),
            Request(request) | Cancel(request) | RejectRequest(request) => {
                dst.put_u32(request.index);
                dst.put_u32(request.begin);
                dst.put_u32(request.length);
            }
            Piece(Block { index, begin, block }) => {
                dst.put_u32(*index);
                dst.put_u32(*begin);
                dst.put_slice(block);
            }
            Port(port) => dst.put_u16(*port),
        };

        Ok(())
    }
}

fn get_block_request(src: &mut Cursor<&[u8]>) -> Result<BlockRequest> {
    check_length!(src.remaining(), 12);
    Ok(BlockRequest {
        index: src.get_u32(),
        begin: src.get_u32(),
        length: src.get_u32(),
    })
}

fn get_piece_index(src: &mut Cursor<&[u8]>) -> Result<u32> {
    check_length!(src.remaining(), 4);
    Ok(src.get_u32())
}

impl<'a> Decode<'a> for BittorrentP2pMessage {
    fn decode(src: &'a [u8]) -> Result<Self> {
        check_length!(src.remaining(), Self::FIXED_PART_LENGTH);

        let mut src = Cursor::new(src);

        let length: usize = src
            .get_u32()
            .try_into()
            .map_err(|_| Error::ConversionError("error when converting BitTorrent message length to usize"))?;

        if length == 0 {
            return Ok(BittorrentP2pMessage::KeepAlive);
        }

        check_length!(src.remaining(), length);

        let message_id: MessageId = src.get_u8().try_into()?;
        if let Some(expected) = message_id.fixed_length() {
            if length != expected {
                return Err(Error::BadPayloadLength(message_id, length, expected));
            }
        }

        Ok(match message_id {
            MessageId::Choke => Self::Choke,
            MessageId::Unchoke => Self::Unchoke,
            MessageId::Interested => Self::Interested,
            MessageId::NotInterested => Self::NotInterested,
            MessageId::HaveAll => Self::HaveAll,
            MessageId::HaveNone => Self::HaveNone,
            MessageId::Have => Self::Have(get_piece_index(&mut src)?),
            MessageId::SuggestPiece => Self::SuggestPiece(get_piece_index(&mut src)?),
            MessageId::AllowedFast => Self::AllowedFast(get_piece_index(&mut src)?),
            MessageId::Bitfield => {
                // account for message id
                let mut raw_bitfield = vec![0; length - 1];
                src.copy_to_slice(&mut raw_bitfield);
                Self::Bitfield(BitVec::from_vec(raw_bitfield))
            }
            MessageId::Request => Self::Request(get_block_request(&mut src)?),
            MessageId::Cancel => Self::Cancel(get_block_request(&mut src)?),
            MessageId::RejectRequest => Self::RejectRequest(get_block_request(&mut src)?),
            MessageId::Piece => {
                check_length!(length, 9);
                let index = src.get_u32();
                let begin = src.get_u32();
                let block_length = length - 1 /* message id */ - std::mem::size_of::<u32>() * 2 /* index + begin */;
                let block = src.copy_to_bytes(block_length);
                Self::Piece(Block { index, begin, block })
            }
            MessageId::Port => {
                check_length!(src.remaining(), 2);
                Self::Port(src.get_u16())
            }
        })
    }
}
