use thiserror::Error;

/// Protocol errors raised while talking to a peer.
///
/// Any of these disconnects the offending peer; none of them crosses the
/// manager boundary.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The handshake prefix or protocol string was wrong.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The handshake carried an info hash for a different torrent.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// A frame declared a length beyond the protocol ceiling.
    #[error("message length {0} exceeds maximum")]
    MessageTooLarge(u32),

    /// A frame's payload didn't match its message id.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    /// Unknown message id.
    #[error("invalid message id: {0}")]
    InvalidMessageId(u8),

    /// BITFIELD arrived after other messages.
    #[error("bitfield not first message")]
    UnexpectedBitfield,

    /// A REQUEST or PIECE referenced data outside the torrent.
    #[error("block out of range: piece {piece} offset {offset} length {length}")]
    BlockOutOfRange { piece: u32, offset: u32, length: u32 },
}
