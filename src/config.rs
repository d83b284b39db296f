//! Session configuration.
//!
//! All tunables for a single-torrent download flow through [`Config`];
//! nothing in the crate reads global state. Validation happens once, at
//! [`DownloadManager::new`](crate::manager::DownloadManager::new).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use rand::Rng as _;
use thiserror::Error;

const PEER_ID_PREFIX: &[u8] = b"-RP0001-";

/// Errors surfaced when a [`Config`] cannot drive a download.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No peer id was supplied and none was generated.
    #[error("peer id is required")]
    MissingPeerId,

    /// A torrent with pieces needs a nonzero piece length.
    #[error("piece length is zero but torrent has {0} pieces")]
    ZeroPieceLength(u32),

    /// The unchoke slot count must leave room for the optimistic slot.
    #[error("max_active_peers must be at least 2, got {0}")]
    TooFewActivePeers(u32),
}

/// A 20-byte Azureus-style peer id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// Generates a fresh id with this client's prefix.
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(PEER_ID_PREFIX);
        rand::rng().fill(&mut id[8..]);
        Self(id)
    }

    /// Builds an id from exactly 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 20 {
            return None;
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(bytes);
        Some(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// The client tag between the dashes, if the id follows the
    /// Azureus convention.
    pub fn client_id(&self) -> Option<&str> {
        if self.0[0] == b'-' && self.0[7] == b'-' {
            std::str::from_utf8(&self.0[1..7]).ok()
        } else {
            None
        }
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(client) = self.client_id() {
            write!(f, "PeerId({})", client)
        } else {
            write!(f, "PeerId({:02x?})", &self.0[..8])
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            if byte.is_ascii_alphanumeric() || *byte == b'-' {
                write!(f, "{}", *byte as char)?;
            } else {
                write!(f, "%{:02x}", byte)?;
            }
        }
        Ok(())
    }
}

/// Configuration for one torrent session.
#[derive(Debug, Clone)]
pub struct Config {
    /// The torrent's 20-byte identity from the metainfo.
    pub info_hash: [u8; 20],

    /// Our peer id. Required; `None` fails validation.
    pub peer_id: Option<PeerId>,

    /// Our own address, used to refuse connecting to ourselves.
    pub my_ip: IpAddr,

    /// The port we listen on for inbound peers.
    pub listen_port: u16,

    /// Upper bound on the peer table.
    pub max_peer_connections: u32,

    /// Unchoke slots, including the optimistic one.
    pub max_active_peers: u32,

    /// Per-peer request pipeline depth.
    pub max_pending_requests: u32,

    /// Total pieces in the torrent.
    pub npieces: u32,

    /// Bytes per piece; the last piece may be shorter.
    pub piece_length: u32,

    /// Where the piece store keeps payload data.
    pub download_path: PathBuf,

    /// Advisory cap for in-memory piece caching.
    pub max_cache_mem_bytes: u64,

    /// Stop serving once the download completes.
    pub shutdown_when_complete: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            info_hash: [b'0'; 20],
            peer_id: None,
            my_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            listen_port: 6881,
            max_peer_connections: 32,
            max_active_peers: 32,
            max_pending_requests: 10,
            npieces: 0,
            piece_length: 0,
            download_path: PathBuf::from("."),
            max_cache_mem_bytes: 1_000_000,
            shutdown_when_complete: false,
        }
    }
}

impl Config {
    /// Checks the invariants a download session depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peer_id.is_none() {
            return Err(ConfigError::MissingPeerId);
        }
        if self.npieces > 0 && self.piece_length == 0 {
            return Err(ConfigError::ZeroPieceLength(self.npieces));
        }
        if self.max_active_peers < 2 {
            return Err(ConfigError::TooFewActivePeers(self.max_active_peers));
        }
        Ok(())
    }

    /// The address we refuse to add as a peer.
    pub fn own_addr(&self) -> SocketAddr {
        SocketAddr::new(self.my_ip, self.listen_port)
    }
}
