/// Per-peer snapshot filled in by `periodic`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerStats {
    /// The peer is choking us.
    pub choked: bool,
    /// We are choking the peer.
    pub choking: bool,
    /// Handshake completed.
    pub connected: bool,
    /// Transport failed.
    pub failed: bool,
    /// Bytes per second we download from the peer.
    pub download_rate: u64,
    /// Bytes per second we upload to the peer.
    pub upload_rate: u64,
}

/// Tick-level statistics.
///
/// The host keeps one of these alive across ticks; `peers` grows to the
/// largest peer count seen and is never shrunk, so the host can reuse
/// the allocation. `count` says how many entries the last tick filled.
#[derive(Debug, Default)]
pub struct TorrentStats {
    pub peers: Vec<PeerStats>,
    pub count: usize,
    /// Pieces completed so far.
    pub pieces_complete: usize,
    /// True once every piece is verified.
    pub seeding: bool,
}

impl TorrentStats {
    pub fn new() -> Self {
        Self::default()
    }
}
