use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use tracing::warn;

/// Attributes corrupt pieces to the peers that supplied them.
///
/// A peer that was the sole source of an invalid piece is banned
/// outright; one that shared an invalid piece with others is suspected,
/// and promoted to banned on a second distinct invalid piece.
#[derive(Debug, Default)]
pub struct Blacklist {
    suspected: HashMap<SocketAddr, HashSet<u32>>,
    banned: HashSet<SocketAddr>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bans outright.
    pub fn ban(&mut self, addr: SocketAddr) {
        if self.banned.insert(addr) {
            warn!(%addr, "peer banned");
        }
    }

    /// Records a suspicion edge; promotes to banned at two distinct
    /// suspected pieces. Returns true if the peer is now banned.
    pub fn suspect(&mut self, piece: u32, addr: SocketAddr) -> bool {
        if self.banned.contains(&addr) {
            return true;
        }
        let pieces = self.suspected.entry(addr).or_default();
        pieces.insert(piece);
        if pieces.len() >= 2 {
            self.suspected.remove(&addr);
            self.ban(addr);
            return true;
        }
        false
    }

    /// Consulted before accepting a connection from `addr`.
    pub fn is_banned(&self, addr: &SocketAddr) -> bool {
        self.banned.contains(addr)
    }

    pub fn banned_count(&self) -> usize {
        self.banned.len()
    }
}
