use std::collections::BTreeSet;

use crate::peer::Bitfield;

/// Tracks which pieces we have, independent of how many the torrent
/// will eventually declare.
///
/// Shared between the manager (which marks completions) and the peer
/// connections (which read it for interest decisions and the BITFIELD
/// we announce).
#[derive(Debug, Default)]
pub struct ProgressCounter {
    complete: BTreeSet<u32>,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a piece complete. Idempotent.
    pub fn mark_complete(&mut self, index: u32) {
        self.complete.insert(index);
    }

    pub fn is_complete(&self, index: u32) -> bool {
        self.complete.contains(&index)
    }

    /// Number of complete pieces.
    pub fn count(&self) -> usize {
        self.complete.len()
    }

    /// True when all `npieces` are complete.
    pub fn is_all_complete(&self, npieces: u32) -> bool {
        npieces > 0 && self.complete.len() == npieces as usize
    }

    /// The BITFIELD we announce after a handshake.
    pub fn to_bitfield(&self, npieces: u32) -> Bitfield {
        let mut bf = Bitfield::new(npieces as usize);
        for &i in &self.complete {
            bf.set(i as usize);
        }
        bf
    }
}
