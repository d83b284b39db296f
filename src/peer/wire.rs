//! Incremental wire parsers.
//!
//! Inbound bytes arrive in whatever chunks the transport hands over, so
//! both parsers buffer partial input across calls. A connection starts
//! with a [`Handshaker`]; once the 68-byte handshake is in, the
//! remainder of the stream flows through a [`MessageReader`].

use bytes::{Buf, BytesMut};

use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN, MAX_FRAME_LEN, PROTOCOL};

/// Accumulates and validates the 68-byte handshake.
#[derive(Debug)]
pub struct Handshaker {
    expected_info_hash: [u8; 20],
    buf: BytesMut,
}

impl Handshaker {
    pub fn new(expected_info_hash: [u8; 20]) -> Self {
        Self {
            expected_info_hash,
            buf: BytesMut::with_capacity(HANDSHAKE_LEN),
        }
    }

    /// Feeds bytes into the handshake buffer.
    ///
    /// Returns how many input bytes were consumed, and the parsed
    /// handshake once all 68 bytes have arrived. Unconsumed input
    /// belongs to the message stream that follows.
    pub fn feed(&mut self, input: &[u8]) -> Result<(usize, Option<Handshake>), PeerError> {
        let take = (HANDSHAKE_LEN - self.buf.len()).min(input.len());
        self.buf.extend_from_slice(&input[..take]);

        // Reject a wrong protocol prefix as soon as it is visible.
        if !self.buf.is_empty() && self.buf[0] != 19 {
            return Err(PeerError::InvalidHandshake);
        }
        if self.buf.len() >= 20 && &self.buf[1..20] != PROTOCOL {
            return Err(PeerError::InvalidHandshake);
        }

        if self.buf.len() < HANDSHAKE_LEN {
            return Ok((take, None));
        }

        let handshake = Handshake::decode(&self.buf)?;
        if handshake.info_hash != self.expected_info_hash {
            return Err(PeerError::InfoHashMismatch);
        }
        Ok((take, Some(handshake)))
    }
}

/// Decodes length-prefixed messages from a byte stream.
#[derive(Debug, Default)]
pub struct MessageReader {
    buf: BytesMut,
}

impl MessageReader {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(32 * 1024),
        }
    }

    /// Appends input and drains every complete frame from the buffer.
    ///
    /// A frame larger than [`MAX_FRAME_LEN`] or with a malformed body is
    /// unrecoverable; the caller disconnects the peer.
    pub fn feed(&mut self, input: &[u8]) -> Result<Vec<Message>, PeerError> {
        self.buf.extend_from_slice(input);
        let mut messages = Vec::new();

        loop {
            if self.buf.len() < 4 {
                break;
            }

            let length = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            if length > MAX_FRAME_LEN {
                return Err(PeerError::MessageTooLarge(length));
            }
            if length == 0 {
                self.buf.advance(4);
                messages.push(Message::KeepAlive);
                continue;
            }

            let total = 4 + length as usize;
            if self.buf.len() < total {
                break;
            }

            let mut frame = self.buf.split_to(total);
            frame.advance(4);
            let id = frame.get_u8();
            messages.push(Message::decode_body(id, frame.freeze())?);
        }

        Ok(messages)
    }

    /// Bytes buffered awaiting the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
