//! The download manager.
//!
//! [`DownloadManager`] is the mediator that binds the peer-wire state
//! machines to the piece store, the selector, the chokers, and the
//! blacklist. Peers never see each other or the store; every
//! interaction flows through here.
//!
//! The manager is single-threaded and clock-explicit: the host calls
//! [`dispatch_from_buffer`](DownloadManager::dispatch_from_buffer) with
//! inbound bytes and [`periodic`](DownloadManager::periodic) at a fixed
//! cadence, passing `Instant::now()`. A host with several I/O threads
//! serializes those calls behind a mutex; the `net` module shows the
//! arrangement.

mod blacklist;
mod jobs;
mod peers;
mod stats;
mod timer;


pub use blacklist::Blacklist;
pub use jobs::{Job, JobQueue};
pub use peers::{NetHandle, Peer, PeerHandle, PeerTable, WireState};
pub use stats::{PeerStats, TorrentStats};
pub use timer::{EventTimer, TimerEvent};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::config::{Config, ConfigError, PeerId};
use crate::peer::{
    ChokeCandidate, Handshake, Handshaker, LeechingChoker, Message, MessageReader,
    PeerConnection, PeerEvent, SeedingChoker,
};
use crate::piece::{BlockRequest, MemoryPieceStore, PieceStore, ProgressCounter, WriteOutcome};
use crate::select::{PieceSelector, RarestFirstSelector};

/// What the host must provide: transport plumbing.
///
/// `peer_connect` mints the net handle immediately and completes in the
/// background; the host reports the outcome through
/// [`DownloadManager::peer_connected`] or
/// [`DownloadManager::peer_connect_failed`].
pub trait HostIo: Send + Sync {
    /// Initiates an outbound connection to `addr`.
    fn peer_connect(&self, addr: SocketAddr) -> io::Result<NetHandle>;

    /// Queues bytes on a transport.
    fn peer_send(&self, net: NetHandle, data: &[u8]) -> io::Result<()>;
}

/// Mediator for a single torrent's download.
pub struct DownloadManager {
    config: Config,
    peer_id: PeerId,
    host: Arc<dyn HostIo>,

    store: Box<dyn PieceStore>,
    selector: Box<dyn PieceSelector>,
    peers: PeerTable,

    jobs: JobQueue,
    timer: EventTimer,
    blacklist: Blacklist,
    lchoke: LeechingChoker,
    schoke: SeedingChoker,

    /// Local completion, shared with every peer connection.
    progress: Arc<RwLock<ProgressCounter>>,
    am_seeding: bool,
}

impl DownloadManager {
    /// Builds a manager over a validated config.
    ///
    /// Starts with an empty in-memory store and the rarest-first
    /// selector; hosts inject replacements through
    /// [`set_store`](Self::set_store) and
    /// [`set_selector`](Self::set_selector).
    pub fn new(config: Config, host: Arc<dyn HostIo>) -> Result<Self, ConfigError> {
        config.validate()?;
        let peer_id = config.peer_id.ok_or(ConfigError::MissingPeerId)?;

        let now = Instant::now();
        let mut timer = EventTimer::new();
        timer.push_in(now, 10, TimerEvent::Reciprocation);
        timer.push_in(now, 30, TimerEvent::OptimisticUnchoke);

        let slots = config.max_active_peers as usize;
        Ok(Self {
            peer_id,
            host,
            store: Box::new(MemoryPieceStore::new()),
            selector: Box::new(RarestFirstSelector::new()),
            peers: PeerTable::new(),
            jobs: JobQueue::new(),
            timer,
            blacklist: Blacklist::new(),
            lchoke: LeechingChoker::new(slots),
            schoke: SeedingChoker::new(slots),
            progress: Arc::new(RwLock::new(ProgressCounter::new())),
            am_seeding: false,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn num_peers(&self) -> usize {
        self.peers.len()
    }

    pub fn is_seeding(&self) -> bool {
        self.am_seeding
    }

    pub fn store(&self) -> &dyn PieceStore {
        &*self.store
    }

    pub fn store_mut(&mut self) -> &mut dyn PieceStore {
        &mut *self.store
    }

    /// Installs the piece store, then accounts for anything already
    /// complete in it.
    pub fn set_store(&mut self, store: Box<dyn PieceStore>) {
        self.store = store;
        self.check_pieces();
    }

    /// Installs a selection strategy. Existing peers and their
    /// announced pieces are re-registered, then the store is re-scanned.
    pub fn set_selector(&mut self, selector: Box<dyn PieceSelector>) {
        self.selector = selector;
        for handle in self.peers.handles() {
            self.selector.add_peer(handle);
            if let Some(peer) = self.peers.get(handle) {
                let pieces = peer.conn.peer_pieces();
                for i in 0..pieces.len() {
                    if pieces.has(i) {
                        self.selector.peer_have_piece(handle, i as u32);
                    }
                }
            }
        }
        self.check_pieces();
    }

    /// Scans the store, marking already-complete pieces into the
    /// progress counter and the selector.
    pub fn check_pieces(&mut self) {
        for i in 0..self.store.len() {
            if self.store.piece(i).is_some_and(|p| p.is_complete()) {
                self.progress.write().mark_complete(i);
                self.selector.have_piece(i);
            }
        }
        if self.progress.read().is_all_complete(self.config.npieces) {
            self.am_seeding = true;
        }
    }

    /// Adds a peer.
    ///
    /// Refuses ourselves, banned addresses, duplicates, and a full
    /// table. Without a net handle the connection is outbound: the host
    /// is asked to connect and a connect failure leaves the peer in the
    /// failed state for the next sweep. With one, the transport is
    /// already live (inbound) and our handshake leads.
    pub fn add_peer(
        &mut self,
        peer_id: Option<PeerId>,
        addr: SocketAddr,
        net: Option<NetHandle>,
        now: Instant,
    ) -> Option<PeerHandle> {
        if addr == self.config.own_addr() {
            debug!(%addr, "refusing to peer with ourselves");
            return None;
        }
        if self.blacklist.is_banned(&addr) {
            debug!(%addr, "refusing banned peer");
            return None;
        }
        if self.peers.len() >= self.config.max_peer_connections as usize {
            debug!(%addr, "peer table full");
            return None;
        }

        let handle = self.peers.allocate();
        let outbound = net.is_none();
        let conn = PeerConnection::new(
            self.config.npieces,
            self.config.piece_length,
            self.config.max_pending_requests as usize,
            Arc::clone(&self.progress),
            outbound,
            now,
        );
        let peer = Peer {
            handle,
            peer_id,
            addr,
            net,
            conn,
            wire: WireState::Handshaking(Handshaker::new(self.config.info_hash)),
        };
        self.peers.insert(peer)?;
        self.selector.add_peer(handle);
        debug!(%addr, %handle, outbound, "peer added");

        if outbound {
            match self.host.peer_connect(addr) {
                Ok(net) => self.peers.bind_net(handle, net),
                Err(err) => {
                    warn!(%addr, %err, "failed connection to peer");
                    if let Some(peer) = self.peers.get_mut(handle) {
                        peer.conn.on_transport_failed();
                    }
                }
            }
        } else {
            self.send_handshake(handle, now);
        }

        Some(handle)
    }

    /// Removes a peer, giving its in-flight requests back to their
    /// pieces and the selector.
    pub fn remove_peer(&mut self, handle: PeerHandle) -> bool {
        let Some(mut peer) = self.peers.remove(handle) else {
            warn!(%handle, "couldn't remove peer");
            return false;
        };
        let pending = peer.conn.take_pending();
        self.giveback_requests(Some(handle), pending);
        self.selector.remove_peer(handle);
        self.lchoke.remove_peer(handle);
        self.schoke.remove_peer(handle);
        debug!(addr = %peer.addr, %handle, "peer removed");
        true
    }

    /// A transport came up: either our outbound connect completed, or
    /// a remote peer connected in (first contact).
    pub fn peer_connected(&mut self, net: NetHandle, addr: SocketAddr, now: Instant) -> bool {
        match self.peers.handle_by_net(net) {
            Some(handle) => {
                if let Some(peer) = self.peers.get_mut(handle) {
                    peer.conn.on_connected();
                }
                self.send_handshake(handle, now)
            }
            None => match self.add_peer(None, addr, Some(net), now) {
                Some(_) => true,
                None => {
                    debug!(%addr, "can't add peer");
                    false
                }
            },
        }
    }

    /// An outbound connect failed. The peer is swept at the next tick.
    pub fn peer_connect_failed(&mut self, net: NetHandle) {
        if let Some(handle) = self.peers.handle_by_net(net) {
            if let Some(peer) = self.peers.get_mut(handle) {
                peer.conn.on_transport_failed();
            }
        }
    }

    /// The host observed the transport close.
    pub fn transport_closed(&mut self, net: NetHandle) {
        if let Some(handle) = self.peers.handle_by_net(net) {
            debug!(%handle, "transport closed");
            self.remove_peer(handle);
        }
    }

    /// Entry point for inbound bytes.
    ///
    /// Pre-handshake bytes feed the handshaker; once the handshake
    /// completes the remainder and all later input flow through
    /// message framing. A parse failure removes the peer. Returns false
    /// when the transport is unknown or the handshake was rejected.
    pub fn dispatch_from_buffer(&mut self, net: NetHandle, data: &[u8], now: Instant) -> bool {
        let Some(handle) = self.peers.handle_by_net(net) else {
            trace!(?net, "bytes for unknown transport");
            return false;
        };
        let mut rest = data;

        let handshaking = matches!(
            self.peers.get(handle).map(|p| &p.wire),
            Some(WireState::Handshaking(_))
        );
        if handshaking {
            let outcome = {
                let Some(peer) = self.peers.get_mut(handle) else {
                    return false;
                };
                match &mut peer.wire {
                    WireState::Handshaking(hs) => hs.feed(rest),
                    WireState::Messages(_) => return false,
                }
            };
            match outcome {
                Err(err) => {
                    debug!(%err, "disconnecting: bad handshake");
                    self.remove_peer(handle);
                    return false;
                }
                Ok((_, None)) => return true,
                Ok((consumed, Some(handshake))) => {
                    rest = &rest[consumed..];
                    if let Some(peer) = self.peers.get_mut(handle) {
                        peer.peer_id = PeerId::from_bytes(&handshake.peer_id);
                        peer.wire = WireState::Messages(MessageReader::new());
                        peer.conn.on_handshake_received(now);
                    }
                    let sent = self
                        .peers
                        .get(handle)
                        .is_some_and(|p| p.conn.handshake_sent());
                    if !sent {
                        self.send_handshake(handle, now);
                    }
                    debug!(%handle, "send bitfield");
                    let bits = self
                        .progress
                        .read()
                        .to_bitfield(self.config.npieces)
                        .to_bytes();
                    if !self.send_to(handle, &Message::Bitfield(bits), now) {
                        self.remove_peer(handle);
                        return true;
                    }
                }
            }
        }

        if rest.is_empty() {
            return true;
        }

        let parsed = {
            let Some(peer) = self.peers.get_mut(handle) else {
                return true;
            };
            match &mut peer.wire {
                WireState::Messages(reader) => reader.feed(rest),
                WireState::Handshaking(_) => return true,
            }
        };
        let messages = match parsed {
            Ok(messages) => messages,
            Err(err) => {
                debug!(%err, "disconnecting: bad msg detected on the wire");
                self.remove_peer(handle);
                return true;
            }
        };

        for msg in messages {
            let Some(peer) = self.peers.get_mut(handle) else {
                return true;
            };
            match peer.conn.on_message(msg, now) {
                Ok(events) => self.route_events(handle, events, now),
                Err(err) => {
                    debug!(%err, "disconnecting: protocol violation");
                    self.remove_peer(handle);
                    return true;
                }
            }
        }

        true
    }

    /// One tick. Drains deferred jobs, fires due timers, runs each
    /// peer's upkeep, sweeps failed peers, and fills `stats`.
    pub fn periodic(&mut self, now: Instant, stats: Option<&mut TorrentStats>) {
        let idle = self.am_seeding && self.config.shutdown_when_complete;
        if !idle {
            while let Some(job) = self.jobs.pop() {
                match job {
                    Job::PollBlocks { peer } => self.run_pollblocks(peer, now),
                }
            }

            for event in self.timer.step(now) {
                match event {
                    TimerEvent::Reciprocation => {
                        self.run_reciprocation(now);
                        self.timer.push_in(now, 10, TimerEvent::Reciprocation);
                    }
                    TimerEvent::OptimisticUnchoke => {
                        self.run_optimistic_unchoke(now);
                        self.timer.push_in(now, 30, TimerEvent::OptimisticUnchoke);
                    }
                }
            }

            for handle in self.peers.handles() {
                let Some(peer) = self.peers.get_mut(handle) else {
                    continue;
                };
                if peer.conn.has_failed() {
                    debug!(%handle, "sweeping failed connection");
                    self.remove_peer(handle);
                    continue;
                }
                let events = peer.conn.periodic(now);
                self.route_events(handle, events, now);
            }
        }

        if let Some(stats) = stats {
            self.collect_stats(stats, now);
        }
    }

    // -- event routing -----------------------------------------------------

    fn route_events(&mut self, handle: PeerHandle, events: Vec<PeerEvent>, now: Instant) {
        for event in events {
            match event {
                PeerEvent::Send(msg) => {
                    self.send_to(handle, &msg, now);
                }
                PeerEvent::BlockArrived(block) => {
                    self.push_block(handle, block.request(), &block.data, now)
                }
                PeerEvent::PollBlocks => self.jobs.push(Job::PollBlocks { peer: handle }),
                PeerEvent::HasPiece(piece) => self.selector.peer_have_piece(handle, piece),
                PeerEvent::GiveBack(requests) => self.giveback_requests(Some(handle), requests),
                PeerEvent::ServeBlock(request) => self.serve_block(handle, request, now),
                PeerEvent::Disconnect(reason) => {
                    debug!(%handle, reason, "disconnecting");
                    self.remove_peer(handle);
                    return;
                }
            }
        }
    }

    /// Writes a received block into its piece and propagates the
    /// outcome: completion marks progress, notifies the selector, and
    /// broadcasts HAVE; a failed hash check attributes blame and
    /// resets the piece.
    fn push_block(&mut self, from: PeerHandle, request: BlockRequest, data: &[u8], now: Instant) {
        let outcome = match self.store.piece_mut(request.piece) {
            Some(piece) => piece.write_block(request, data, from),
            None => {
                warn!(piece = request.piece, "block for unknown piece");
                return;
            }
        };

        match outcome {
            WriteOutcome::Complete => {
                debug!(piece = request.piece, "piece downloaded");
                self.progress.write().mark_complete(request.piece);
                self.selector.have_piece(request.piece);
                self.broadcast_have(request.piece, now);
                if !self.am_seeding && self.progress.read().is_all_complete(self.config.npieces) {
                    info!("all pieces complete, seeding");
                    self.am_seeding = true;
                }
            }
            WriteOutcome::Accepted => {}
            WriteOutcome::Rejected => {
                warn!(
                    piece = request.piece,
                    offset = request.offset,
                    "error writing block"
                );
            }
            WriteOutcome::HashMismatch => self.handle_corrupt_piece(request.piece),
        }
    }

    /// A piece arrived whole but failed its hash check. The sole
    /// contributor is banned outright; shared blame makes every
    /// contributor a suspect. Either way the piece starts over.
    fn handle_corrupt_piece(&mut self, piece: u32) {
        let contributors: Vec<PeerHandle> = self
            .store
            .piece(piece)
            .map(|p| p.contributors().iter().copied().collect())
            .unwrap_or_default();
        warn!(piece, contributors = contributors.len(), "piece failed hash check");

        if let [only] = contributors[..] {
            if let Some(peer) = self.peers.get(only) {
                self.blacklist.ban(peer.addr);
            }
        } else {
            for &handle in &contributors {
                if let Some(peer) = self.peers.get(handle) {
                    self.blacklist.suspect(piece, peer.addr);
                }
            }
        }

        if let Some(p) = self.store.piece_mut(piece) {
            p.drop_progress();
        }
        self.selector.peer_giveback_piece(None, piece);
    }

    /// Announces a completed piece to every peer whose handshake is
    /// done, once each.
    fn broadcast_have(&mut self, piece: u32, now: Instant) {
        for handle in self.peers.handles() {
            let connected = self
                .peers
                .get(handle)
                .is_some_and(|p| p.conn.is_connected());
            if connected {
                self.send_to(handle, &Message::Have { piece }, now);
            }
        }
    }

    /// Reads a block of a complete piece and transmits it.
    fn serve_block(&mut self, to: PeerHandle, request: BlockRequest, now: Instant) {
        let data = self
            .store
            .piece(request.piece)
            .and_then(|p| p.read_block(request));
        let Some(data) = data else {
            warn!(
                piece = request.piece,
                offset = request.offset,
                "unable to read block for upload"
            );
            return;
        };
        let len = data.len() as u64;
        let sent = self.send_to(
            to,
            &Message::Piece {
                piece: request.piece,
                offset: request.offset,
                data,
            },
            now,
        );
        if sent {
            if let Some(peer) = self.peers.get_mut(to) {
                peer.conn.record_upload(now, len);
            }
        }
    }

    fn giveback_requests(&mut self, peer: Option<PeerHandle>, requests: Vec<BlockRequest>) {
        for request in requests {
            if let Some(piece) = self.store.piece_mut(request.piece) {
                piece.giveback_block(request);
            }
            self.selector.peer_giveback_piece(peer, request.piece);
        }
    }

    /// Fills a peer's request pipeline from the selector.
    ///
    /// Iterates `poll_block_request` until the piece is fully requested
    /// or the pipeline ceiling is reached; a piece left with missing
    /// blocks goes back on the pool.
    fn run_pollblocks(&mut self, handle: PeerHandle, now: Instant) {
        if self.peers.get(handle).is_none() {
            return;
        }

        loop {
            let Some(index) = self.selector.poll_piece(handle) else {
                return;
            };

            match self.store.piece(index) {
                Some(piece) if piece.is_complete() => {
                    // Stale selector entry; reconcile and try again.
                    self.selector.have_piece(index);
                    continue;
                }
                Some(_) => {}
                None => {
                    self.selector.peer_giveback_piece(Some(handle), index);
                    return;
                }
            }

            loop {
                let fully_requested = self
                    .store
                    .piece(index)
                    .map(|p| p.is_fully_requested())
                    .unwrap_or(true);
                if fully_requested {
                    return;
                }

                let room = self
                    .peers
                    .get(handle)
                    .map(|p| p.conn.has_pipeline_room())
                    .unwrap_or(false);
                if !room {
                    self.selector.peer_giveback_piece(Some(handle), index);
                    return;
                }

                let Some(request) = self
                    .store
                    .piece_mut(index)
                    .and_then(|p| p.poll_block_request())
                else {
                    return;
                };

                let msg = self
                    .peers
                    .get_mut(handle)
                    .and_then(|p| p.conn.offer_block(request, now));
                match msg {
                    Some(msg) => {
                        self.send_to(handle, &msg, now);
                    }
                    None => {
                        if let Some(piece) = self.store.piece_mut(index) {
                            piece.giveback_block(request);
                        }
                        self.selector.peer_giveback_piece(Some(handle), index);
                        return;
                    }
                }
            }
        }
    }

    // -- choking -----------------------------------------------------------

    fn choke_candidates(&mut self, now: Instant) -> Vec<ChokeCandidate> {
        let seeding = self.am_seeding;
        let mut candidates = Vec::new();
        for peer in self.peers.iter_mut() {
            if !peer.conn.is_connected() {
                continue;
            }
            let choke = peer.conn.choke_state();
            candidates.push(ChokeCandidate {
                peer: peer.handle,
                rate: if seeding {
                    peer.conn.upload_rate(now)
                } else {
                    peer.conn.download_rate(now)
                },
                interested: choke.peer_interested,
                choked: choke.am_choking,
            });
        }
        candidates
    }

    fn run_reciprocation(&mut self, now: Instant) {
        let candidates = self.choke_candidates(now);
        let decisions = if self.am_seeding {
            self.schoke.decide(&candidates)
        } else {
            self.lchoke.decide(&candidates)
        };
        for decision in decisions {
            self.apply_choke(decision.peer, decision.unchoke, now);
        }
    }

    fn run_optimistic_unchoke(&mut self, now: Instant) {
        let candidates = self.choke_candidates(now);
        let pick = if self.am_seeding {
            self.schoke.rotate_optimistic(&candidates)
        } else {
            self.lchoke.rotate_optimistic(&candidates)
        };
        if let Some(peer) = pick {
            debug!(%peer, "optimistic unchoke");
            self.apply_choke(peer, true, now);
        }
    }

    fn apply_choke(&mut self, handle: PeerHandle, unchoke: bool, now: Instant) {
        let msg = {
            let Some(peer) = self.peers.get_mut(handle) else {
                return;
            };
            if unchoke {
                peer.conn.unchoke_peer(now)
            } else {
                peer.conn.choke_peer(now)
            }
        };
        if let Some(msg) = msg {
            trace!(%handle, unchoke, "choke flip");
            self.send_to(handle, &msg, now);
        }
    }

    // -- transport ---------------------------------------------------------

    fn send_handshake(&mut self, handle: PeerHandle, now: Instant) -> bool {
        let data = Handshake::new(self.config.info_hash, self.peer_id.0).encode();
        let Some(peer) = self.peers.get_mut(handle) else {
            return false;
        };
        let Some(net) = peer.net else {
            return false;
        };
        match self.host.peer_send(net, &data) {
            Ok(()) => {
                debug!(%handle, "send handshake");
                peer.conn.mark_handshake_sent(now);
                true
            }
            Err(err) => {
                warn!(%handle, %err, "handshake send failed");
                peer.conn.on_transport_failed();
                false
            }
        }
    }

    /// Encodes and transmits; a send failure marks the transport
    /// failed for the next sweep.
    fn send_to(&mut self, handle: PeerHandle, msg: &Message, now: Instant) -> bool {
        let data = msg.encode();
        let Some(peer) = self.peers.get_mut(handle) else {
            return false;
        };
        let Some(net) = peer.net else {
            return false;
        };
        match self.host.peer_send(net, &data) {
            Ok(()) => {
                peer.conn.note_sent(now);
                true
            }
            Err(err) => {
                debug!(%handle, %err, "send failed");
                peer.conn.on_transport_failed();
                false
            }
        }
    }

    // -- stats -------------------------------------------------------------

    fn collect_stats(&mut self, stats: &mut TorrentStats, now: Instant) {
        let count = self.peers.len();
        if stats.peers.len() < count {
            stats.peers.resize(count, PeerStats::default());
        }
        stats.count = 0;
        for peer in self.peers.iter_mut() {
            let choke = peer.conn.choke_state();
            stats.peers[stats.count] = PeerStats {
                choked: choke.peer_choking,
                choking: choke.am_choking,
                connected: peer.conn.is_connected(),
                failed: peer.conn.has_failed(),
                download_rate: peer.conn.download_rate(now),
                upload_rate: peer.conn.upload_rate(now),
            };
            stats.count += 1;
        }
        stats.pieces_complete = self.progress.read().count();
        stats.seeding = self.am_seeding;
    }
}
