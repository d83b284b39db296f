use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::bitfield::Bitfield;
use super::error::PeerError;
use super::message::{Message, MAX_REQUEST_LEN};
use super::rate::RateCounter;
use crate::piece::{Block, BlockRequest, ProgressCounter};

/// Send a keep-alive after this much outbound silence.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);
/// Drop a peer after this much inbound silence.
const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection phase. `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Outbound connect in flight; nothing on the wire yet.
    Connecting,
    /// Transport up, handshake not yet received.
    Handshaking,
    /// Handshake received; full message flow.
    Connected,
    /// Transport or connect failure; swept at the next tick.
    Failed,
}

/// The four choke/interest bits, with protocol defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChokeState {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
}

impl Default for ChokeState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// What a connection wants the mediator to do on its behalf.
///
/// The connection never touches the store, the selector, or other
/// peers; it describes the work and the mediator routes it.
#[derive(Debug, PartialEq, Eq)]
pub enum PeerEvent {
    /// Transmit a message to this peer.
    Send(Message),
    /// A block the peer delivered, to be written into its piece.
    BlockArrived(Block),
    /// Schedule block polling for this peer.
    PollBlocks,
    /// The peer announced it has a piece.
    HasPiece(u32),
    /// Requests this peer will no longer honor; return them to their
    /// pieces and the selector.
    GiveBack(Vec<BlockRequest>),
    /// Read this block from the store and transmit a PIECE.
    ServeBlock(BlockRequest),
    /// Drop the connection.
    Disconnect(&'static str),
}

/// Per-peer protocol state machine.
///
/// Owns the choke/interest bits, the remote bitfield, the request
/// pipeline and upload queue, and the transfer-rate meters. Everything
/// here is driven by the mediator: inbound messages through
/// [`on_message`](Self::on_message), the clock through
/// [`periodic`](Self::periodic).
#[derive(Debug)]
pub struct PeerConnection {
    state: ConnState,
    choke: ChokeState,
    handshake_sent: bool,
    saw_first_message: bool,

    /// Pieces the remote side claims to have.
    peer_pieces: Bitfield,
    /// Outstanding REQUESTs, in issue order.
    pending: VecDeque<BlockRequest>,
    /// REQUESTs from the peer awaiting service.
    uploads: VecDeque<BlockRequest>,

    download: RateCounter,
    upload: RateCounter,
    last_rx: Instant,
    last_tx: Instant,

    npieces: u32,
    piece_length: u32,
    max_pending: usize,

    /// Local completion, shared with the mediator.
    progress: Arc<RwLock<ProgressCounter>>,
}

impl PeerConnection {
    pub fn new(
        npieces: u32,
        piece_length: u32,
        max_pending: usize,
        progress: Arc<RwLock<ProgressCounter>>,
        outbound: bool,
        now: Instant,
    ) -> Self {
        Self {
            state: if outbound {
                ConnState::Connecting
            } else {
                ConnState::Handshaking
            },
            choke: ChokeState::default(),
            handshake_sent: false,
            saw_first_message: false,
            peer_pieces: Bitfield::new(npieces as usize),
            pending: VecDeque::new(),
            uploads: VecDeque::new(),
            download: RateCounter::new(now),
            upload: RateCounter::new(now),
            last_rx: now,
            last_tx: now,
            npieces,
            piece_length,
            max_pending,
            progress,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn choke_state(&self) -> ChokeState {
        self.choke
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    pub fn has_failed(&self) -> bool {
        self.state == ConnState::Failed
    }

    pub fn peer_pieces(&self) -> &Bitfield {
        &self.peer_pieces
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pipeline_room(&self) -> bool {
        self.pending.len() < self.max_pending
    }

    pub fn download_rate(&mut self, now: Instant) -> u64 {
        self.download.rate(now)
    }

    pub fn upload_rate(&mut self, now: Instant) -> u64 {
        self.upload.rate(now)
    }

    /// The outbound connect completed; the handshake can go out.
    pub fn on_connected(&mut self) {
        if self.state == ConnState::Connecting {
            self.state = ConnState::Handshaking;
        }
    }

    /// The transport failed. Terminal.
    pub fn on_transport_failed(&mut self) {
        self.state = ConnState::Failed;
    }

    pub fn mark_handshake_sent(&mut self, now: Instant) {
        self.handshake_sent = true;
        self.last_tx = now;
    }

    pub fn handshake_sent(&self) -> bool {
        self.handshake_sent
    }

    /// A valid handshake arrived (infohash already verified).
    pub fn on_handshake_received(&mut self, now: Instant) {
        self.last_rx = now;
        if self.state != ConnState::Failed {
            self.state = ConnState::Connected;
        }
    }

    /// Processes one wire message, in wire order.
    pub fn on_message(
        &mut self,
        msg: Message,
        now: Instant,
    ) -> Result<Vec<PeerEvent>, PeerError> {
        self.last_rx = now;
        let mut events = Vec::new();

        match msg {
            Message::KeepAlive => {}
            Message::Choke => {
                self.choke.peer_choking = true;
                let returned: Vec<_> = self.pending.drain(..).collect();
                if !returned.is_empty() {
                    events.push(PeerEvent::GiveBack(returned));
                }
            }
            Message::Unchoke => {
                self.choke.peer_choking = false;
                events.push(PeerEvent::PollBlocks);
            }
            Message::Interested => {
                self.choke.peer_interested = true;
            }
            Message::NotInterested => {
                self.choke.peer_interested = false;
            }
            Message::Have { piece } => {
                if piece >= self.npieces {
                    return Err(PeerError::InvalidMessage("have index out of range"));
                }
                self.peer_pieces.set(piece as usize);
                events.push(PeerEvent::HasPiece(piece));
                self.update_interest(&mut events);
            }
            Message::Bitfield(bits) => {
                if self.saw_first_message {
                    return Err(PeerError::UnexpectedBitfield);
                }
                self.peer_pieces = Bitfield::from_bytes(&bits, self.npieces as usize);
                for i in 0..self.npieces {
                    if self.peer_pieces.has(i as usize) {
                        events.push(PeerEvent::HasPiece(i));
                    }
                }
                self.update_interest(&mut events);
            }
            Message::Request {
                piece,
                offset,
                length,
            } => {
                // A choked peer gets nothing; stale requests from
                // before the choke are routine.
                if !self.choke.am_choking {
                    self.validate_block(piece, offset, length)?;
                    let request = BlockRequest::new(piece, offset, length);
                    if self.progress.read().is_complete(piece) && !self.uploads.contains(&request)
                    {
                        self.uploads.push_back(request);
                    }
                }
            }
            Message::Piece {
                piece,
                offset,
                data,
            } => {
                self.validate_block(piece, offset, data.len() as u32)?;
                let request = BlockRequest::new(piece, offset, data.len() as u32);
                if let Some(pos) = self.pending.iter().position(|r| *r == request) {
                    self.pending.remove(pos);
                }
                self.download.record(now, data.len() as u64);
                events.push(PeerEvent::BlockArrived(Block::new(piece, offset, data)));
                events.push(PeerEvent::PollBlocks);
            }
            Message::Cancel {
                piece,
                offset,
                length,
            } => {
                let request = BlockRequest::new(piece, offset, length);
                if let Some(pos) = self.uploads.iter().position(|r| *r == request) {
                    self.uploads.remove(pos);
                }
            }
        }

        self.saw_first_message = true;
        Ok(events)
    }

    /// One tick of connection upkeep.
    pub fn periodic(&mut self, now: Instant) -> Vec<PeerEvent> {
        let mut events = Vec::new();

        if self.state != ConnState::Connected {
            // A transport that never produces a handshake still counts
            // as silence.
            if self.state == ConnState::Handshaking
                && now.duration_since(self.last_rx) > IDLE_TIMEOUT
            {
                events.push(PeerEvent::Disconnect("timeout"));
            }
            return events;
        }

        if now.duration_since(self.last_rx) > IDLE_TIMEOUT {
            events.push(PeerEvent::Disconnect("timeout"));
            return events;
        }

        if now.duration_since(self.last_tx) > KEEPALIVE_INTERVAL {
            self.last_tx = now;
            events.push(PeerEvent::Send(Message::KeepAlive));
        }

        while let Some(request) = self.uploads.pop_front() {
            events.push(PeerEvent::ServeBlock(request));
        }

        if !self.choke.peer_choking && self.has_pipeline_room() {
            events.push(PeerEvent::PollBlocks);
        }

        events
    }

    /// Accepts a block for the request pipeline.
    ///
    /// Returns the REQUEST to transmit, or `None` when the pipeline is
    /// at `max_pending_requests`.
    pub fn offer_block(&mut self, request: BlockRequest, now: Instant) -> Option<Message> {
        if !self.has_pipeline_room() {
            return None;
        }
        self.pending.push_back(request);
        self.last_tx = now;
        Some(Message::Request {
            piece: request.piece,
            offset: request.offset,
            length: request.length,
        })
    }

    /// Drains the outstanding request set, for give-back on removal.
    pub fn take_pending(&mut self) -> Vec<BlockRequest> {
        self.pending.drain(..).collect()
    }

    /// Chokes the peer. Queued uploads are dropped; the peer must
    /// re-request after an unchoke.
    pub fn choke_peer(&mut self, now: Instant) -> Option<Message> {
        if self.choke.am_choking {
            return None;
        }
        self.choke.am_choking = true;
        self.uploads.clear();
        self.last_tx = now;
        Some(Message::Choke)
    }

    pub fn unchoke_peer(&mut self, now: Instant) -> Option<Message> {
        if !self.choke.am_choking {
            return None;
        }
        self.choke.am_choking = false;
        self.last_tx = now;
        Some(Message::Unchoke)
    }

    /// Records bytes we transmitted to this peer.
    pub fn record_upload(&mut self, now: Instant, bytes: u64) {
        self.upload.record(now, bytes);
        self.last_tx = now;
    }

    /// Notes a transmission the mediator made on this connection's
    /// behalf, resetting the keep-alive clock.
    pub fn note_sent(&mut self, now: Instant) {
        self.last_tx = now;
    }

    /// Declares interest when the peer has something we lack.
    fn update_interest(&mut self, events: &mut Vec<PeerEvent>) {
        if self.choke.am_interested {
            return;
        }
        let progress = self.progress.read();
        let wanted = (0..self.npieces)
            .any(|i| self.peer_pieces.has(i as usize) && !progress.is_complete(i));
        if wanted {
            self.choke.am_interested = true;
            events.push(PeerEvent::Send(Message::Interested));
        }
    }

    fn validate_block(&self, piece: u32, offset: u32, length: u32) -> Result<(), PeerError> {
        let in_range = piece < self.npieces
            && length <= MAX_REQUEST_LEN
            && offset
                .checked_add(length)
                .is_some_and(|end| end <= self.piece_length);
        if in_range {
            Ok(())
        } else {
            Err(PeerError::BlockOutOfRange {
                piece,
                offset,
                length,
            })
        }
    }
}
