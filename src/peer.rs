//! Peer wire protocol (BEP-3).
//!
//! Everything that happens on a single peer connection: the wire
//! codec, the incremental handshake and message parsers, the per-peer
//! protocol state machine, transfer-rate metering, and the choking
//! disciplines.

mod bitfield;
mod choking;
mod connection;
mod error;
mod message;
mod rate;
mod wire;

#[cfg(test)]
mod tests;

pub use bitfield::Bitfield;
pub use choking::{ChokeCandidate, ChokeDecision, LeechingChoker, SeedingChoker};
pub use connection::{ChokeState, ConnState, PeerConnection, PeerEvent};
pub use error::PeerError;
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN, MAX_FRAME_LEN, MAX_REQUEST_LEN};
pub use rate::RateCounter;
pub use wire::{Handshaker, MessageReader};
