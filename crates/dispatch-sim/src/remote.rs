use std::collections::VecDeque;

use anyhow::Context;
use bittorrent_peer_protocol::{BittorrentP2pMessage, BlockRequest, Decode};
use bytes::BytesMut;
use rand::Rng;

/// Collects the bytes written by the dispatcher and splits them into messages.
///
/// The dispatcher may stop in the middle of a message, so incomplete frames are kept until the
/// rest arrives.
#[derive(Debug, Default)]
pub struct FrameReader {
    inner: BytesMut,
}

impl FrameReader {
    pub fn feed(&mut self, bytes: &[u8]) {
        self.inner.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.inner.len()
    }

    pub fn next_message(&mut self) -> anyhow::Result<Option<BittorrentP2pMessage>> {
        if self.inner.len() < BittorrentP2pMessage::FIXED_PART_LENGTH {
            return Ok(None);
        }

        let message_length = try_into!(
            u32::from_be_bytes(try_into!(
                &self.inner[0..BittorrentP2pMessage::FIXED_PART_LENGTH],
                [u8; 4]
            )?),
            usize
        )?;
        let frame_length = BittorrentP2pMessage::FIXED_PART_LENGTH + message_length;
        if self.inner.len() < frame_length {
            return Ok(None);
        }

        let frame = self.inner.split_to(frame_length);
        let message = BittorrentP2pMessage::decode(&frame).context("decoding a dispatched message")?;

        Ok(Some(message))
    }
}

/// How many messages of each kind the remote peer got from us
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub requests: usize,
    pub cancels: usize,
    pub pieces: usize,
    pub rejects: usize,
    pub uploaded_bytes: usize,
    pub other: usize,
}

/// The other end of the connection. Answers our requests in order and requests blocks from us.
#[derive(Debug, Default)]
pub struct RemotePeer {
    reader: FrameReader,
    /// Our requests it is going to answer, oldest first
    pending: VecDeque<BlockRequest>,
    /// Its requests we haven't answered yet
    requested_from_us: Vec<BlockRequest>,
    choked_by_us: bool,
    received: Received,
}

impl RemotePeer {
    pub fn received(&self) -> Received {
        self.received
    }

    pub fn is_choked_by_us(&self) -> bool {
        self.choked_by_us
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Handles everything the dispatcher wrote during a pass
    pub fn receive(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.reader.feed(bytes);

        while let Some(message) = self.reader.next_message()? {
            tracing::trace!(?message, "remote peer received a message");
            match message {
                BittorrentP2pMessage::Request(request) => {
                    self.received.requests += 1;
                    self.pending.push_back(request);
                }
                BittorrentP2pMessage::Cancel(request) => {
                    self.received.cancels += 1;
                    self.pending.retain(|pending| *pending != request);
                }
                BittorrentP2pMessage::Piece(block) => {
                    self.received.pieces += 1;
                    self.received.uploaded_bytes += block.block.len();
                    self.requested_from_us
                        .retain(|request| request.index != block.index || request.begin != block.begin);
                }
                BittorrentP2pMessage::RejectRequest(rejected) => {
                    self.received.rejects += 1;
                    self.requested_from_us.retain(|request| *request != rejected);
                }
                BittorrentP2pMessage::Choke => {
                    self.received.other += 1;
                    self.choked_by_us = true;
                }
                BittorrentP2pMessage::Unchoke => {
                    self.received.other += 1;
                    self.choked_by_us = false;
                }
                _ => self.received.other += 1,
            }
        }

        Ok(())
    }

    /// The oldest request it is going to answer now
    pub fn take_response(&mut self) -> Option<BlockRequest> {
        self.pending.pop_front()
    }

    /// Drops our requests when it chokes us, except the ones from its allowed fast set
    pub fn drop_pending_on_choke(&mut self, is_allowed_fast: impl Fn(u32) -> bool) {
        self.pending.retain(|request| is_allowed_fast(request.index));
    }

    /// Silently drops one of our requests, so it times out on our side
    pub fn lose_request<R: Rng>(&mut self, rng: &mut R) -> Option<BlockRequest> {
        if self.pending.is_empty() {
            return None;
        }
        let position = rng.gen_range(0..self.pending.len());
        self.pending.remove(position)
    }

    pub fn request_from_us(&mut self, request: BlockRequest) {
        self.requested_from_us.push(request);
    }

    /// Takes back one of its requests to us
    pub fn cancel_request<R: Rng>(&mut self, rng: &mut R) -> Option<BlockRequest> {
        if self.requested_from_us.is_empty() {
            return None;
        }
        let position = rng.gen_range(0..self.requested_from_us.len());
        Some(self.requested_from_us.swap_remove(position))
    }
}
