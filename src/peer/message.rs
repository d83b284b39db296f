use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::PeerError;

/// The BitTorrent protocol identifier.
pub const PROTOCOL: &[u8] = b"BitTorrent protocol";
/// Length of the handshake message in bytes.
pub const HANDSHAKE_LEN: usize = 68;
/// Protocol ceiling on a single REQUEST's length field.
pub const MAX_REQUEST_LEN: u32 = 16 * 1024;
/// Largest legal frame: one block plus the PIECE header slack.
pub const MAX_FRAME_LEN: u32 = (1 << 17) + 13;

/// Message type identifiers in the peer wire protocol.
///
/// Each message (except keep-alive) has a one-byte id following the
/// length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            _ => Err(PeerError::InvalidMessageId(value)),
        }
    }
}

/// The BitTorrent handshake.
///
/// First bytes on the wire in both directions: `0x13`, the literal
/// `"BitTorrent protocol"`, 8 reserved bytes, the torrent's info hash,
/// and the sender's peer id.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub reserved: [u8; 8],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            info_hash,
            peer_id,
            reserved: [0u8; 8],
        }
    }

    /// Encodes the handshake for transmission.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(19);
        buf.put_slice(PROTOCOL);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.freeze()
    }

    /// Decodes exactly [`HANDSHAKE_LEN`] bytes.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN {
            return Err(PeerError::InvalidHandshake);
        }
        if data[0] != 19 || &data[1..20] != PROTOCOL {
            return Err(PeerError::InvalidHandshake);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self {
            info_hash,
            peer_id,
            reserved,
        })
    }
}

/// A peer wire protocol message.
///
/// Messages are length-prefixed: a 4-byte big-endian length followed by
/// a 1-byte message id (except keep-alive, which is length 0) and the
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Empty message to keep the connection alive.
    KeepAlive,
    /// We stopped serving the peer's requests.
    Choke,
    /// We will serve the peer's requests.
    Unchoke,
    /// We want data from the peer.
    Interested,
    /// We no longer want data from the peer.
    NotInterested,
    /// Announce a newly acquired piece.
    Have { piece: u32 },
    /// Announce every piece we have.
    Bitfield(Bytes),
    /// Ask for a block of data.
    Request { piece: u32, offset: u32, length: u32 },
    /// Deliver a block of data.
    Piece { piece: u32, offset: u32, data: Bytes },
    /// Withdraw a pending request.
    Cancel { piece: u32, offset: u32, length: u32 },
}

impl Message {
    /// Encodes the message, length prefix included.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Message::KeepAlive => {
                buf.put_u32(0);
            }
            Message::Choke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Choke as u8);
            }
            Message::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Unchoke as u8);
            }
            Message::Interested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Interested as u8);
            }
            Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::NotInterested as u8);
            }
            Message::Have { piece } => {
                buf.put_u32(5);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request {
                piece,
                offset,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(MessageId::Request as u8);
                buf.put_u32(*piece);
                buf.put_u32(*offset);
                buf.put_u32(*length);
            }
            Message::Piece {
                piece,
                offset,
                data,
            } => {
                buf.put_u32(9 + data.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*piece);
                buf.put_u32(*offset);
                buf.put_slice(data);
            }
            Message::Cancel {
                piece,
                offset,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(MessageId::Cancel as u8);
                buf.put_u32(*piece);
                buf.put_u32(*offset);
                buf.put_u32(*length);
            }
        }

        buf.freeze()
    }

    /// Decodes a whole frame including the length prefix.
    pub fn decode(mut data: Bytes) -> Result<Self, PeerError> {
        if data.len() < 4 {
            return Err(PeerError::InvalidMessage("frame shorter than prefix"));
        }

        let length = data.get_u32();
        if length == 0 {
            return Ok(Message::KeepAlive);
        }
        if length > MAX_FRAME_LEN {
            return Err(PeerError::MessageTooLarge(length));
        }
        if data.remaining() < length as usize {
            return Err(PeerError::InvalidMessage("incomplete frame"));
        }

        let id = data.get_u8();
        Self::decode_body(id, data.split_to(length as usize - 1))
    }

    /// Decodes a frame body: the id byte has been read, `payload` is
    /// the rest of the frame.
    pub(crate) fn decode_body(id: u8, mut payload: Bytes) -> Result<Self, PeerError> {
        match MessageId::try_from(id)? {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                if payload.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("have too short"));
                }
                Ok(Message::Have {
                    piece: payload.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(payload)),
            MessageId::Request => {
                if payload.remaining() < 12 {
                    return Err(PeerError::InvalidMessage("request too short"));
                }
                Ok(Message::Request {
                    piece: payload.get_u32(),
                    offset: payload.get_u32(),
                    length: payload.get_u32(),
                })
            }
            MessageId::Piece => {
                if payload.remaining() < 8 {
                    return Err(PeerError::InvalidMessage("piece too short"));
                }
                let piece = payload.get_u32();
                let offset = payload.get_u32();
                Ok(Message::Piece {
                    piece,
                    offset,
                    data: payload,
                })
            }
            MessageId::Cancel => {
                if payload.remaining() < 12 {
                    return Err(PeerError::InvalidMessage("cancel too short"));
                }
                Ok(Message::Cancel {
                    piece: payload.get_u32(),
                    offset: payload.get_u32(),
                    length: payload.get_u32(),
                })
            }
        }
    }
}
