//! riptide - the download-manager core of a BitTorrent client.
//!
//! This crate implements everything between the transport and the
//! torrent for a single download: the peer wire protocol state
//! machine, piece and block bookkeeping with SHA-1 verification,
//! pluggable piece selection, tit-for-tat choking, and the mediator
//! that binds them together.
//!
//! The core owns no sockets. A host hands inbound bytes to
//! [`DownloadManager::dispatch_from_buffer`], ticks
//! [`DownloadManager::periodic`], and provides transport through the
//! [`HostIo`] trait; the [`net`] module is a ready-made tokio host.
//!
//! # Modules
//!
//! - [`config`] - Session configuration and peer identity
//! - [`manager`] - The download manager and its supporting structures
//! - [`net`] - Reference tokio host driving the manager over TCP
//! - [`peer`] - Peer wire protocol: codec, state machine, choking
//! - [`piece`] - Pieces, blocks, verification, and the piece store
//! - [`select`] - Piece selection strategies

pub mod config;
pub mod manager;
pub mod net;
pub mod peer;
pub mod piece;
pub mod select;

pub use config::{Config, ConfigError, PeerId};
pub use manager::{
    Blacklist, DownloadManager, HostIo, Job, NetHandle, PeerHandle, PeerStats, TorrentStats,
};
pub use peer::{
    Bitfield, ChokeState, Handshake, LeechingChoker, Message, PeerConnection, PeerError,
    SeedingChoker,
};
pub use piece::{Block, BlockRequest, MemoryPieceStore, Piece, PieceStore, WriteOutcome};
pub use select::{PieceSelector, RandomSelector, RarestFirstSelector, SequentialSelector};
