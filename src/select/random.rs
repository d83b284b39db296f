use rand::Rng as _;

use crate::manager::PeerHandle;

use super::{PieceSelector, SelectorCore};

/// Picks uniformly among eligible pieces; spreads first requests
/// across the swarm.
#[derive(Debug, Default)]
pub struct RandomSelector {
    core: SelectorCore,
}

impl RandomSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PieceSelector for RandomSelector {
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
        let eligible: Vec<u32> = self.core.eligible(peer).collect();
        if eligible.is_empty() {
            return None;
        }
        let pick = eligible[rand::rng().random_range(0..eligible.len())];
        self.core.lend(pick);
        Some(pick)
    }
}
