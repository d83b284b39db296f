use crate::manager::PeerHandle;

use super::{PieceSelector, SelectorCore};

/// Picks the lowest eligible index; useful when pieces should arrive
/// in stream order.
#[derive(Debug, Default)]
pub struct SequentialSelector {
    core: SelectorCore,
}

impl SequentialSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PieceSelector for SequentialSelector {
    fn add_peer(&mut self, peer: PeerHandle) {
        self.core.add_peer(peer);
    }

    fn remove_peer(&mut self, peer: PeerHandle) {
        self.core.remove_peer(peer);
    }

    fn have_piece(&mut self, piece: u32) {
        self.core.have_piece(piece);
    }

    fn peer_have_piece(&mut self, peer: PeerHandle, piece: u32) {
        self.core.peer_have_piece(peer, piece);
    }

    fn peer_giveback_piece(&mut self, _peer: Option<PeerHandle>, piece: u32) {
        self.core.giveback(piece);
    }

    fn poll_piece(&mut self, peer: PeerHandle) -> Option<u32> {
        let pick = self.core.eligible(peer).min()?;
        self.core.lend(pick);
        Some(pick)
    }
}
