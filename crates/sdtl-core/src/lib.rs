//! SDTL wire protocol.
//!
//! Every datagram starts with a two byte header:
//!
//! ```text
//! +---------+---------+------------------------------+
//! | version |  type   |  body (type dependent)       |
//! +---------+---------+------------------------------+
//!    0xDF     see MessageType
//! ```
//!
//! | Type | Body |
//! |------|------|
//! | `Start` (0x01) | ip(4) session(8) signature(64) |
//! | `ServerResponse` (0x02) | session(8) ephemeral key(65) signature(64) |
//! | `ClientResponse` (0x03) | session(8) ephemeral key(65) signature(64) |
//! | `DataFrame` (0xAA) | nonce(12) tag(16) ciphertext(..) |

#![forbid(unsafe_code)]

pub mod error;
pub mod frame;
pub mod handshake;
pub mod ip;

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use rand::rngs::OsRng;
use rand::RngCore;

pub use error::{Error, Result};
pub use frame::{dump_frame, encode_frame_datagram, load_frame, MIN_FRAME_SIZE};
pub use handshake::{HandshakeMessage, HandshakeResponse, StartMessage};
pub use ip::ipv4_destination;

/// Protocol version carried in byte 0 of every datagram.
pub const PROTOCOL_VERSION: u8 = 0xDF;

/// Version + message type.
pub const HEADER_SIZE: usize = 2;

/// Receive buffer size for a single datagram.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Session identifier length.
pub const SESSION_ID_SIZE: usize = 8;

/// Datagram message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Initiator opens a handshake.
    Start = 0x01,
    /// Responder answers with its ephemeral key.
    ServerResponse = 0x02,
    /// Initiator completes with its ephemeral key.
    ClientResponse = 0x03,
    /// Sealed IP packet.
    DataFrame = 0xAA,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Start),
            0x02 => Ok(Self::ServerResponse),
            0x03 => Ok(Self::ClientResponse),
            0xAA => Ok(Self::DataFrame),
            _ => Err(Error::UnknownMessageType(value)),
        }
    }
}

/// Split a datagram into its message type and body.
///
/// Fails with [`Error::ProtocolMismatch`] on a foreign version byte and with
/// [`Error::UnknownMessageType`] on an unassigned type byte.
pub fn decode_header(datagram: &[u8]) -> Result<(MessageType, &[u8])> {
    if datagram.len() < HEADER_SIZE {
        return Err(Error::Format(format!(
            "datagram too short: {} bytes",
            datagram.len()
        )));
    }
    if datagram[0] != PROTOCOL_VERSION {
        return Err(Error::ProtocolMismatch(datagram[0], PROTOCOL_VERSION));
    }
    let message_type = MessageType::try_from(datagram[1])?;
    Ok((message_type, &datagram[HEADER_SIZE..]))
}

/// Prefix `body` with the protocol header.
pub fn encode_datagram(message_type: MessageType, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(message_type as u8);
    buf.put_slice(body);
    buf.freeze()
}

/// Random 8-byte value binding the messages of one handshake together.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionId([u8; SESSION_ID_SIZE]);

impl SessionId {
    pub const fn from_bytes(bytes: [u8; SESSION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Fresh id from the OS CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; SESSION_ID_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }
}

impl From<u64> for SessionId {
    fn from(value: u64) -> Self {
        Self(value.to_be_bytes())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let datagram = encode_datagram(MessageType::DataFrame, b"body");
        assert_eq!(&datagram[..2], &[PROTOCOL_VERSION, 0xAA]);

        let (message_type, body) = decode_header(&datagram).unwrap();
        assert_eq!(message_type, MessageType::DataFrame);
        assert_eq!(body, b"body");
    }

    #[test]
    fn test_header_rejects_foreign_version() {
        let result = decode_header(&[0x01, 0x01, 0x00]);
        assert!(matches!(result, Err(Error::ProtocolMismatch(0x01, PROTOCOL_VERSION))));
    }

    #[test]
    fn test_header_rejects_unknown_type() {
        let result = decode_header(&[PROTOCOL_VERSION, 0x10]);
        assert!(matches!(result, Err(Error::UnknownMessageType(0x10))));
    }

    #[test]
    fn test_header_rejects_short_datagram() {
        assert!(matches!(decode_header(&[]), Err(Error::Format(_))));
        assert!(matches!(decode_header(&[PROTOCOL_VERSION]), Err(Error::Format(_))));
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::from(0x1122334455667788);
        assert_eq!(id.as_bytes(), &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
        assert_eq!(id.to_string(), "1122334455667788");
    }

    #[test]
    fn test_random_session_ids_differ() {
        assert_ne!(SessionId::random(), SessionId::random());
    }
}
