use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use anyhow::Context;
use bittorrent_peer_protocol::{BittorrentP2pMessage, Block, BlockRequest};
use bytes::Bytes;
use peer_dispatcher::{
    Dispatcher, DispatcherConfig, Peer, RequestSlot, WindowedSink, WireMessageFactory, DEFAULT_BLOCK_SIZE,
};
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::Rng;

use crate::bandwidth::UploadLimiter;
use crate::peer::{SimPeer, UploadStats};
use crate::remote::RemotePeer;
use crate::storage::SimStorage;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub peer_addr: SocketAddrV4,
    pub pieces: u32,
    pub blocks_per_piece: u32,
    pub request_timeout: Duration,
    /// Bytes the simulated socket accepts per dispatch pass
    pub window: usize,
    /// Maximum number of outstanding requests
    pub pipeline: usize,
    pub upload_limit: u64,
    pub overall_upload_limit: u64,
    pub fast_extension: bool,
    /// Pieces in each of the allowed fast sets
    pub allowed_fast: usize,
}

/// A single connection: our dispatcher on one side, a scripted remote peer on the other
#[derive(Debug)]
pub struct Simulation {
    dispatcher: Dispatcher,
    factory: WireMessageFactory,
    storage: SimStorage,
    peer: SimPeer,
    remote: RemotePeer,
    limiter: UploadLimiter,
    stats: UploadStats,
    sink: WindowedSink,
    rng: StdRng,
    pipeline: usize,
    choking_remote: bool,
    started_at: Instant,
}

impl Simulation {
    pub fn new(config: SimulationConfig, mut rng: StdRng) -> Self {
        let mut dispatcher = Dispatcher::new(config.peer_addr, DispatcherConfig::new(config.request_timeout));
        let factory = WireMessageFactory::new(config.fast_extension);
        let mut peer = SimPeer::default();

        if config.fast_extension {
            for index in (0..config.pieces).choose_multiple(&mut rng, config.allowed_fast) {
                peer.allow_fast_for_remote(index);
                dispatcher.queue_message(factory.create_message(BittorrentP2pMessage::AllowedFast(index)));
            }
            for index in (0..config.pieces).choose_multiple(&mut rng, config.allowed_fast) {
                peer.allow_fast(index);
            }
        }
        dispatcher.queue_message(factory.create_interested_message(true));
        dispatcher.queue_message(factory.create_unchoke_message());

        Simulation {
            dispatcher,
            factory,
            storage: SimStorage::new(config.pieces, config.blocks_per_piece),
            peer,
            remote: RemotePeer::default(),
            limiter: UploadLimiter::new(config.upload_limit, config.overall_upload_limit),
            stats: UploadStats::default(),
            sink: WindowedSink::new(config.window),
            rng,
            pipeline: config.pipeline,
            choking_remote: false,
            started_at: Instant::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.storage.is_complete()
    }

    /// One iteration of the connection loop: request more blocks, then send what fits into the socket
    pub fn dispatch(&mut self) -> anyhow::Result<()> {
        self.fill_pipeline();

        self.limiter.advance(Instant::now());
        self.sink.refill();
        self.dispatcher
            .dispatch(&mut self.sink, &self.limiter, &mut self.stats)
            .context("dispatching queued messages")?;

        let uploaded_before = self.remote.received().uploaded_bytes;
        self.remote
            .receive(&self.sink.take())
            .context("remote peer handling dispatched messages")?;
        self.limiter.record_upload(
            self.remote.received().uploaded_bytes - uploaded_before,
            Instant::now(),
        );

        Ok(())
    }

    pub fn sweep(&mut self) {
        self.dispatcher.sweep(&mut self.peer, &mut self.storage, &self.factory);
    }

    /// Plays a random event of the remote side or of the rest of the client
    pub fn remote_event(&mut self) {
        match self.rng.gen_range(0..100) {
            0..=44 => self.deliver_block(),
            45..=49 => self.remote_chokes_us(),
            50..=59 => self.remote_unchokes_us(),
            60..=74 => self.remote_requests_block(),
            75..=79 => self.remote_cancels_request(),
            80..=83 => self.choke_remote(),
            84..=89 => self.unchoke_remote(),
            90..=93 => self.acquire_elsewhere(),
            94..=96 => self.lose_request(),
            _ => self.abort_random_piece(),
        }
    }

    pub fn log_summary(&self) {
        let received = self.remote.received();
        tracing::info!(
            elapsed = ?self.started_at.elapsed(),
            completed_pieces = self.storage.completed_pieces(),
            total_pieces = self.storage.number_of_pieces(),
            outstanding_requests = self.dispatcher.count_outstanding_requests(),
            queued_messages = self.dispatcher.count_queued_messages(),
            queued_uploads = self.dispatcher.count_outstanding_upload(),
            sending_in_progress = self.dispatcher.is_sending_in_progress(),
            snubbing = self.peer.is_snubbing(),
            "download summary"
        );
        tracing::info!(
            requests = received.requests,
            cancels = received.cancels,
            pieces = received.pieces,
            rejects = received.rejects,
            other = received.other,
            uploaded_bytes = received.uploaded_bytes,
            upload_passes = self.stats.upload_passes(self.dispatcher.peer_addr()),
            "messages received by the remote peer"
        );
    }

    fn fill_pipeline(&mut self) {
        // A snubbing peer only gets one request at a time
        let pipeline = if self.peer.is_snubbing() { 1 } else { self.pipeline };

        while self.dispatcher.count_outstanding_requests() < pipeline {
            let Some(request) = self.storage.pick_block(&self.peer) else {
                break;
            };
            self.dispatcher.request_block(
                self.factory.create_request_message(request),
                RequestSlot::for_request(&request),
            );
        }
    }

    fn deliver_block(&mut self) {
        let Some(request) = self.remote.take_response() else {
            return;
        };
        let Some(slot) = self
            .dispatcher
            .outstanding_request(request.index, request.begin, request.length)
            .copied()
        else {
            tracing::debug!(index = request.index, begin = request.begin, "got a block that is no longer requested");
            return;
        };

        let completed = self
            .storage
            .piece_at_mut(slot.index)
            .is_some_and(|piece| piece.acquire(slot.block_index));
        self.dispatcher.remove_outstanding_request(&slot, &mut self.storage);
        self.peer.set_snubbing(false);

        if completed {
            tracing::debug!(index = slot.index, "piece completed");
            self.dispatcher.queue_message(self.factory.create_have_message(slot.index));
        }
    }

    fn remote_chokes_us(&mut self) {
        if self.peer.is_choking_us() {
            return;
        }
        tracing::debug!("remote peer chokes us");

        self.peer.set_choking_us(true);
        let peer = &self.peer;
        self.remote.drop_pending_on_choke(|index| peer.is_allowed_fast(index));
        self.dispatcher.on_choked(&self.peer, &mut self.storage);
    }

    fn remote_unchokes_us(&mut self) {
        if self.peer.is_choking_us() {
            tracing::debug!("remote peer unchokes us");
            self.peer.set_choking_us(false);
        }
    }

    fn remote_requests_block(&mut self) {
        let index = self.rng.gen_range(0..self.storage.number_of_pieces());
        if self.remote.is_choked_by_us() && !self.peer.is_am_allowed_fast(index) {
            return;
        }

        let request = BlockRequest {
            index,
            begin: 0,
            length: DEFAULT_BLOCK_SIZE,
        };
        self.remote.request_from_us(request);
        self.dispatcher.queue_message(self.factory.create_piece_message(Block {
            index,
            begin: request.begin,
            block: Bytes::from(vec![0; DEFAULT_BLOCK_SIZE as usize]),
        }));
    }

    fn remote_cancels_request(&mut self) {
        if let Some(request) = self.remote.cancel_request(&mut self.rng) {
            self.dispatcher
                .on_cancel_sending_piece(request.index, request.begin, request.length);
        }
    }

    fn choke_remote(&mut self) {
        if self.choking_remote {
            return;
        }
        tracing::debug!("choking the remote peer");

        self.choking_remote = true;
        self.dispatcher.queue_message(self.factory.create_choke_message());
        self.dispatcher.on_choking(&self.peer);
    }

    fn unchoke_remote(&mut self) {
        if self.choking_remote {
            self.choking_remote = false;
            self.dispatcher.queue_message(self.factory.create_unchoke_message());
        }
    }

    fn acquire_elsewhere(&mut self) {
        if let Some((index, block_index)) = self.storage.acquire_elsewhere(&mut self.rng) {
            tracing::debug!(index, block_index, "block downloaded through another connection");
        }
    }

    fn lose_request(&mut self) {
        if let Some(request) = self.remote.lose_request(&mut self.rng) {
            tracing::debug!(index = request.index, begin = request.begin, "remote peer lost a request");
        }
    }

    fn abort_random_piece(&mut self) {
        let Some(index) = self.storage.random_requested_piece(&mut self.rng) else {
            return;
        };
        if let Some(piece) = self.storage.piece_at_mut(index) {
            self.dispatcher.on_abort_outstanding_request(piece);
        }
    }
}
