//! Pieces and blocks.
//!
//! A torrent's payload is divided into fixed-size pieces, each verified
//! against a SHA-1 digest from the metainfo; peers exchange pieces in
//! blocks of at most 16 KiB. [`Piece`] tracks per-block request state,
//! remembers which peers contributed data, and verifies the digest when
//! the last block lands.

mod progress;
mod store;


pub use progress::ProgressCounter;
pub use store::{MemoryPieceStore, PieceStore};

use std::collections::HashSet;

use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::manager::PeerHandle;

/// Standard block size (16 KiB).
pub const BLOCK_SIZE: u32 = 16384;

/// A request for one block of a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece: u32,
    pub offset: u32,
    pub length: u32,
}

impl BlockRequest {
    pub fn new(piece: u32, offset: u32, length: u32) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }
}

/// A block of piece data, as delivered by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub piece: u32,
    pub offset: u32,
    pub data: Bytes,
}

impl Block {
    pub fn new(piece: u32, offset: u32, data: Bytes) -> Self {
        Self {
            piece,
            offset,
            data,
        }
    }

    /// The request this block answers.
    pub fn request(&self) -> BlockRequest {
        BlockRequest {
            piece: self.piece,
            offset: self.offset,
            length: self.data.len() as u32,
        }
    }
}

/// Request state of one block within a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Missing,
    Requested,
    Received,
}

/// Result of writing a block into a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The piece is now complete and its SHA-1 verified.
    Complete,
    /// Block stored; the piece is still incomplete.
    Accepted,
    /// The block could not be stored; its state stays missing.
    Rejected,
    /// Every block arrived but the digest does not match. The caller
    /// attributes blame before resetting the piece.
    HashMismatch,
}

/// A fixed-size byte range with a SHA-1 checksum.
#[derive(Debug)]
pub struct Piece {
    index: u32,
    length: u32,
    expected_sha1: [u8; 20],
    blocks: Vec<BlockState>,
    data: Vec<u8>,
    contributors: HashSet<PeerHandle>,
    complete: bool,
}

impl Piece {
    pub fn new(index: u32, length: u32, expected_sha1: [u8; 20]) -> Self {
        let nblocks = (length as usize).div_ceil(BLOCK_SIZE as usize);
        Self {
            index,
            length,
            expected_sha1,
            blocks: vec![BlockState::Missing; nblocks],
            data: vec![0; length as usize],
            contributors: HashSet::new(),
            complete: false,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// True when no block is left to request.
    pub fn is_fully_requested(&self) -> bool {
        self.blocks.iter().all(|b| *b != BlockState::Missing)
    }

    /// Peers that contributed at least one block since the last reset.
    pub fn contributors(&self) -> &HashSet<PeerHandle> {
        &self.contributors
    }

    /// Length of the block starting at `offset`; short for the tail.
    fn block_length_at(&self, offset: u32) -> u32 {
        BLOCK_SIZE.min(self.length - offset)
    }

    /// Hands out the next missing block, marking it requested.
    ///
    /// The returned length is `min(16384, length - offset)`.
    pub fn poll_block_request(&mut self) -> Option<BlockRequest> {
        let i = self.blocks.iter().position(|b| *b == BlockState::Missing)?;
        self.blocks[i] = BlockState::Requested;
        let offset = i as u32 * BLOCK_SIZE;
        Some(BlockRequest::new(
            self.index,
            offset,
            self.block_length_at(offset),
        ))
    }

    /// Returns a requested block to the missing pool. Inverse of
    /// [`poll_block_request`](Self::poll_block_request).
    pub fn giveback_block(&mut self, request: BlockRequest) {
        if let Some(state) = self.block_state_mut(request.offset) {
            if *state == BlockState::Requested {
                *state = BlockState::Missing;
            }
        }
    }

    /// Writes one block, attributed to `peer`.
    pub fn write_block(&mut self, request: BlockRequest, data: &[u8], peer: PeerHandle) -> WriteOutcome {
        if self.complete {
            return WriteOutcome::Accepted;
        }
        let valid = request.piece == self.index
            && request.offset % BLOCK_SIZE == 0
            && request.length as usize == data.len()
            && request.offset < self.length
            && request.length == self.block_length_at(request.offset);
        if !valid {
            return WriteOutcome::Rejected;
        }

        let i = (request.offset / BLOCK_SIZE) as usize;
        if self.blocks[i] == BlockState::Received {
            return WriteOutcome::Accepted;
        }

        let start = request.offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        self.blocks[i] = BlockState::Received;
        self.contributors.insert(peer);

        if self.blocks.iter().all(|b| *b == BlockState::Received) {
            if Sha1::digest(&self.data)[..] == self.expected_sha1 {
                self.complete = true;
                WriteOutcome::Complete
            } else {
                WriteOutcome::HashMismatch
            }
        } else {
            WriteOutcome::Accepted
        }
    }

    /// Forgets all download progress: every block back to missing,
    /// contributors cleared. Used after a failed hash check.
    pub fn drop_progress(&mut self) {
        for b in &mut self.blocks {
            *b = BlockState::Missing;
        }
        self.contributors.clear();
        self.complete = false;
    }

    /// Reads a block of a complete piece for upload.
    pub fn read_block(&self, request: BlockRequest) -> Option<Bytes> {
        if !self.complete {
            return None;
        }
        let start = request.offset as usize;
        let end = start.checked_add(request.length as usize)?;
        if end > self.data.len() {
            return None;
        }
        Some(Bytes::copy_from_slice(&self.data[start..end]))
    }

    /// Installs already-verified payload, e.g. restored by the host.
    /// Returns false and leaves the piece untouched if the digest does
    /// not match.
    pub fn preload(&mut self, data: &[u8]) -> bool {
        if data.len() != self.length as usize || Sha1::digest(data)[..] != self.expected_sha1 {
            return false;
        }
        self.data.copy_from_slice(data);
        for b in &mut self.blocks {
            *b = BlockState::Received;
        }
        self.complete = true;
        true
    }

    fn block_state_mut(&mut self, offset: u32) -> Option<&mut BlockState> {
        if offset % BLOCK_SIZE != 0 {
            return None;
        }
        self.blocks.get_mut((offset / BLOCK_SIZE) as usize)
    }
}
