use crate::peer::Bitfield;

use super::Piece;

/// Capability boundary for piece storage.
///
/// The manager only ever reaches pieces through this trait; hosts that
/// persist payload to disk implement it over their own backend.
pub trait PieceStore: Send {
    /// The piece at `index`, if one has been added.
    fn piece(&self, index: u32) -> Option<&Piece>;

    fn piece_mut(&mut self, index: u32) -> Option<&mut Piece>;

    /// Number of pieces added so far.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First piece a remote bitfield offers that we still want.
    fn poll_best_from_bitfield(&self, remote: &Bitfield) -> Option<u32> {
        (0..self.len()).find(|&i| {
            remote.has(i as usize)
                && self
                    .piece(i)
                    .is_some_and(|p| !p.is_complete())
        })
    }
}

/// Piece store backed by in-memory buffers.
///
/// Geometry follows the metainfo: every piece is `piece_length` bytes
/// except the last, which shrinks to fit the total payload size.
#[derive(Debug, Default)]
pub struct MemoryPieceStore {
    pieces: Vec<Piece>,
    piece_length: u32,
    total_size: Option<u64>,
}

impl MemoryPieceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_piece_length(&mut self, piece_length: u32) {
        self.piece_length = piece_length;
    }

    pub fn set_total_size(&mut self, total_size: u64) {
        self.total_size = Some(total_size);
    }

    /// Appends the next piece, given its expected digest.
    ///
    /// The new piece's index is its position; its length is the piece
    /// length, clipped for the final piece when a total size is set.
    pub fn add(&mut self, expected_sha1: [u8; 20]) -> u32 {
        let index = self.pieces.len() as u32;
        let offset = index as u64 * self.piece_length as u64;
        let length = match self.total_size {
            Some(total) => total
                .saturating_sub(offset)
                .min(self.piece_length as u64) as u32,
            None => self.piece_length,
        };
        self.pieces.push(Piece::new(index, length, expected_sha1));
        index
    }
}

impl PieceStore for MemoryPieceStore {
    fn piece(&self, index: u32) -> Option<&Piece> {
        self.pieces.get(index as usize)
    }

    fn piece_mut(&mut self, index: u32) -> Option<&mut Piece> {
        self.pieces.get_mut(index as usize)
    }

    fn len(&self) -> u32 {
        self.pieces.len() as u32
    }
}
