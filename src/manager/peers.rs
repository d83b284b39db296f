use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use crate::config::PeerId;
use crate::peer::{Handshaker, MessageReader, PeerConnection};

/// Small opaque id into the manager's peer table.
///
/// Piece contributors, selector bookkeeping, and jobs all hold one of
/// these instead of a reference, so there are no ownership back-edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerHandle(pub u64);

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Opaque transport token minted by the host I/O layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetHandle(pub u64);

/// Parser the inbound byte stream currently flows through.
#[derive(Debug)]
pub enum WireState {
    /// Pre-handshake: bytes accumulate until the 68-byte handshake is in.
    Handshaking(Handshaker),
    /// Post-handshake: length-prefixed message framing.
    Messages(MessageReader),
}

/// One remote peer and everything we own for it.
#[derive(Debug)]
pub struct Peer {
    pub handle: PeerHandle,
    pub peer_id: Option<PeerId>,
    pub addr: SocketAddr,
    pub net: Option<NetHandle>,
    pub conn: PeerConnection,
    pub wire: WireState,
}

/// The set of peers, indexed by handle, transport token, and address.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<PeerHandle, Peer>,
    by_net: HashMap<NetHandle, PeerHandle>,
    by_addr: HashMap<SocketAddr, PeerHandle>,
    next: u64,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains_addr(&self, addr: &SocketAddr) -> bool {
        self.by_addr.contains_key(addr)
    }

    /// Mints the next handle. The caller inserts the built peer.
    pub fn allocate(&mut self) -> PeerHandle {
        self.next += 1;
        PeerHandle(self.next)
    }

    /// Inserts a peer. Refuses a duplicate address.
    pub fn insert(&mut self, peer: Peer) -> Option<PeerHandle> {
        if self.by_addr.contains_key(&peer.addr) {
            return None;
        }
        let handle = peer.handle;
        self.by_addr.insert(peer.addr, handle);
        if let Some(net) = peer.net {
            self.by_net.insert(net, handle);
        }
        self.peers.insert(handle, peer);
        Some(handle)
    }

    /// Associates a transport token once the host has minted one.
    pub fn bind_net(&mut self, handle: PeerHandle, net: NetHandle) {
        if let Some(peer) = self.peers.get_mut(&handle) {
            if let Some(old) = peer.net.replace(net) {
                self.by_net.remove(&old);
            }
            self.by_net.insert(net, handle);
        }
    }

    pub fn get(&self, handle: PeerHandle) -> Option<&Peer> {
        self.peers.get(&handle)
    }

    pub fn get_mut(&mut self, handle: PeerHandle) -> Option<&mut Peer> {
        self.peers.get_mut(&handle)
    }

    pub fn handle_by_net(&self, net: NetHandle) -> Option<PeerHandle> {
        self.by_net.get(&net).copied()
    }

    pub fn remove(&mut self, handle: PeerHandle) -> Option<Peer> {
        let peer = self.peers.remove(&handle)?;
        self.by_addr.remove(&peer.addr);
        if let Some(net) = peer.net {
            self.by_net.remove(&net);
        }
        Some(peer)
    }

    /// Snapshot of all handles, for iteration that mutates the table.
    pub fn handles(&self) -> Vec<PeerHandle> {
        let mut handles: Vec<_> = self.peers.keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }
}
