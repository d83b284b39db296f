use rand::Rng as _;

use crate::manager::PeerHandle;

/// Rate/interest snapshot for one peer, taken by the mediator at
/// decision time. `rate` is download-from-peer for the leeching
/// discipline and upload-to-peer for the seeding one.
#[derive(Debug, Clone, Copy)]
pub struct ChokeCandidate {
    pub peer: PeerHandle,
    pub rate: u64,
    pub interested: bool,
    pub choked: bool,
}

/// A choke flip the mediator should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChokeDecision {
    pub peer: PeerHandle,
    pub unchoke: bool,
}

/// Ranks candidates and returns the flips needed to unchoke the top
/// `slots - 1` plus the optimistic slot.
fn rank(slots: usize, optimistic: Option<PeerHandle>, candidates: &[ChokeCandidate]) -> Vec<ChokeDecision> {
    let mut ranked: Vec<&ChokeCandidate> = candidates.iter().filter(|c| c.interested).collect();
    ranked.sort_by(|a, b| b.rate.cmp(&a.rate));

    let mut unchoked: Vec<PeerHandle> = ranked
        .iter()
        .take(slots.saturating_sub(1))
        .map(|c| c.peer)
        .collect();

    if let Some(opt) = optimistic {
        if !unchoked.contains(&opt) && candidates.iter().any(|c| c.peer == opt) {
            unchoked.push(opt);
        }
    }

    candidates
        .iter()
        .filter_map(|c| {
            let want_unchoked = unchoked.contains(&c.peer);
            if want_unchoked == c.choked {
                Some(ChokeDecision {
                    peer: c.peer,
                    unchoke: want_unchoked,
                })
            } else {
                None
            }
        })
        .collect()
}

/// Picks a new optimistic peer uniformly from the choked and
/// interested candidates.
fn pick_optimistic(candidates: &[ChokeCandidate]) -> Option<PeerHandle> {
    let pool: Vec<PeerHandle> = candidates
        .iter()
        .filter(|c| c.interested && c.choked)
        .map(|c| c.peer)
        .collect();
    if pool.is_empty() {
        return None;
    }
    Some(pool[rand::rng().random_range(0..pool.len())])
}

/// Choking discipline while downloading: reciprocate the peers we
/// download fastest from, plus one optimistic slot to discover better
/// ones.
#[derive(Debug)]
pub struct LeechingChoker {
    slots: usize,
    optimistic: Option<PeerHandle>,
}

impl LeechingChoker {
    pub fn new(max_active_peers: usize) -> Self {
        Self {
            slots: max_active_peers,
            optimistic: None,
        }
    }

    /// The 10-second reciprocation pass. `rate` in each candidate is
    /// the download rate from that peer.
    pub fn decide(&mut self, candidates: &[ChokeCandidate]) -> Vec<ChokeDecision> {
        rank(self.slots, self.optimistic, candidates)
    }

    /// The 30-second optimistic rotation. Returns the peer to unchoke
    /// out of band of the rate ranking.
    pub fn rotate_optimistic(&mut self, candidates: &[ChokeCandidate]) -> Option<PeerHandle> {
        if let Some(pick) = pick_optimistic(candidates) {
            self.optimistic = Some(pick);
        }
        self.optimistic
    }

    pub fn remove_peer(&mut self, peer: PeerHandle) {
        if self.optimistic == Some(peer) {
            self.optimistic = None;
        }
    }

    pub fn optimistic(&self) -> Option<PeerHandle> {
        self.optimistic
    }
}

/// Choking discipline once the torrent is complete: serve the peers we
/// upload fastest to.
#[derive(Debug)]
pub struct SeedingChoker {
    slots: usize,
    optimistic: Option<PeerHandle>,
}

impl SeedingChoker {
    pub fn new(max_active_peers: usize) -> Self {
        Self {
            slots: max_active_peers,
            optimistic: None,
        }
    }

    /// The 10-second pass. `rate` in each candidate is the upload rate
    /// to that peer.
    pub fn decide(&mut self, candidates: &[ChokeCandidate]) -> Vec<ChokeDecision> {
        rank(self.slots, self.optimistic, candidates)
    }

    pub fn rotate_optimistic(&mut self, candidates: &[ChokeCandidate]) -> Option<PeerHandle> {
        if let Some(pick) = pick_optimistic(candidates) {
            self.optimistic = Some(pick);
        }
        self.optimistic
    }

    pub fn remove_peer(&mut self, peer: PeerHandle) {
        if self.optimistic == Some(peer) {
            self.optimistic = None;
        }
    }
}
