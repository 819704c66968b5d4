//! Signed handshake messages.
//!
//! ```text
//! Initiator                                Responder
//!     |  Start { ip, session }  (signed)        |
//!     |---------------------------------------->|
//!     |  ServerResponse { session, epk }        |
//!     |<----------------------------------------|
//!     |  ClientResponse { session, epk }        |
//!     |---------------------------------------->|
//!     [  both sides: key = ECDH(own e, peer epk) ]
//! ```
//!
//! Each message is signed with the sender's long-term key. The signature
//! always covers exactly the bytes preceding the signature field. Parsing is
//! strict: the body length must match exactly and the signature must verify
//! before any field is handed back to the caller.

use std::net::Ipv4Addr;

use bytes::Bytes;
use sdtl_crypto::{IdentityKeypair, PeerIdentity, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};

use crate::error::{Error, Result};
use crate::{encode_datagram, MessageType, SessionId, SESSION_ID_SIZE};

/// Start body: ip(4) session(8) signature(64).
pub const START_SIZE: usize = 4 + SESSION_ID_SIZE + SIGNATURE_SIZE;
const START_SESSION_OFFSET: usize = 4;
const START_SIGNATURE_OFFSET: usize = START_SESSION_OFFSET + SESSION_ID_SIZE;

/// Server/Client response body: session(8) ephemeral key(65) signature(64).
pub const RESPONSE_SIZE: usize = SESSION_ID_SIZE + PUBLIC_KEY_SIZE + SIGNATURE_SIZE;
const RESPONSE_KEY_OFFSET: usize = SESSION_ID_SIZE;
const RESPONSE_SIGNATURE_OFFSET: usize = RESPONSE_KEY_OFFSET + PUBLIC_KEY_SIZE;

/// Sent by the initiator to open a session for its virtual IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartMessage {
    pub virtual_ip: Ipv4Addr,
    pub session_id: SessionId,
}

impl StartMessage {
    /// Read the claimed virtual IP without verifying anything.
    ///
    /// The responder needs it to pick the verification key. The result must
    /// not be trusted until [`HandshakeMessage::parse`] succeeds.
    pub fn peek_virtual_ip(body: &[u8]) -> Result<Ipv4Addr> {
        check_size(body, START_SIZE)?;
        Ok(Ipv4Addr::new(body[0], body[1], body[2], body[3]))
    }
}

/// Ephemeral key announcement, used by both response messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub session_id: SessionId,
    pub ephemeral_key: [u8; PUBLIC_KEY_SIZE],
}

/// The three handshake messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMessage {
    Start(StartMessage),
    ServerResponse(HandshakeResponse),
    ClientResponse(HandshakeResponse),
}

impl HandshakeMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Start(_) => MessageType::Start,
            Self::ServerResponse(_) => MessageType::ServerResponse,
            Self::ClientResponse(_) => MessageType::ClientResponse,
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Start(start) => start.session_id,
            Self::ServerResponse(resp) | Self::ClientResponse(resp) => resp.session_id,
        }
    }

    /// Body length on the wire, excluding the header.
    pub fn body_size(&self) -> usize {
        match self {
            Self::Start(_) => START_SIZE,
            Self::ServerResponse(_) | Self::ClientResponse(_) => RESPONSE_SIZE,
        }
    }

    /// Encode the body and sign it with `signer`.
    pub fn serialize(&self, signer: &IdentityKeypair) -> Vec<u8> {
        let mut buf = vec![0u8; self.body_size()];
        let signature_offset = match self {
            Self::Start(start) => {
                buf[..START_SESSION_OFFSET].copy_from_slice(&start.virtual_ip.octets());
                buf[START_SESSION_OFFSET..START_SIGNATURE_OFFSET]
                    .copy_from_slice(start.session_id.as_bytes());
                START_SIGNATURE_OFFSET
            }
            Self::ServerResponse(resp) | Self::ClientResponse(resp) => {
                buf[..RESPONSE_KEY_OFFSET].copy_from_slice(resp.session_id.as_bytes());
                buf[RESPONSE_KEY_OFFSET..RESPONSE_SIGNATURE_OFFSET]
                    .copy_from_slice(&resp.ephemeral_key);
                RESPONSE_SIGNATURE_OFFSET
            }
        };

        let signature = signer.sign(&buf[..signature_offset]);
        buf[signature_offset..].copy_from_slice(&signature);
        buf
    }

    /// Header plus signed body, ready to send.
    pub fn to_datagram(&self, signer: &IdentityKeypair) -> Bytes {
        encode_datagram(self.message_type(), &self.serialize(signer))
    }

    /// Decode and verify a handshake body.
    ///
    /// Fails with [`Error::Format`] on any length mismatch and with
    /// [`Error::Signature`] if `verify_key` did not sign the body.
    pub fn parse(message_type: MessageType, verify_key: &PeerIdentity, body: &[u8]) -> Result<Self> {
        match message_type {
            MessageType::Start => {
                check_size(body, START_SIZE)?;
                verify(verify_key, body, START_SIGNATURE_OFFSET)?;

                let mut session = [0u8; SESSION_ID_SIZE];
                session.copy_from_slice(&body[START_SESSION_OFFSET..START_SIGNATURE_OFFSET]);
                Ok(Self::Start(StartMessage {
                    virtual_ip: Ipv4Addr::new(body[0], body[1], body[2], body[3]),
                    session_id: SessionId::from_bytes(session),
                }))
            }
            MessageType::ServerResponse | MessageType::ClientResponse => {
                check_size(body, RESPONSE_SIZE)?;
                verify(verify_key, body, RESPONSE_SIGNATURE_OFFSET)?;

                let mut session = [0u8; SESSION_ID_SIZE];
                session.copy_from_slice(&body[..RESPONSE_KEY_OFFSET]);
                let mut ephemeral_key = [0u8; PUBLIC_KEY_SIZE];
                ephemeral_key.copy_from_slice(&body[RESPONSE_KEY_OFFSET..RESPONSE_SIGNATURE_OFFSET]);

                let resp = HandshakeResponse {
                    session_id: SessionId::from_bytes(session),
                    ephemeral_key,
                };
                if message_type == MessageType::ServerResponse {
                    Ok(Self::ServerResponse(resp))
                } else {
                    Ok(Self::ClientResponse(resp))
                }
            }
            MessageType::DataFrame => Err(Error::Format(
                "data frame is not a handshake message".into(),
            )),
        }
    }
}

fn check_size(body: &[u8], expected: usize) -> Result<()> {
    if body.len() != expected {
        return Err(Error::Format(format!(
            "handshake body is {} bytes, expected {}",
            body.len(),
            expected
        )));
    }
    Ok(())
}

fn verify(verify_key: &PeerIdentity, body: &[u8], signature_offset: usize) -> Result<()> {
    let mut signature = [0u8; SIGNATURE_SIZE];
    signature.copy_from_slice(&body[signature_offset..]);
    if !verify_key.verify(&body[..signature_offset], &signature) {
        return Err(Error::Signature);
    }
    Ok(())
}
