//! Per-datagram protocol handling.
//!
//! The dispatcher owns the [`Registry`] and is driven by a single task, so
//! registry access needs no locking. Every handler either produces at most one
//! datagram to send or a [`DropReason`]; nothing here is fatal.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::Bytes;
use sdtl_core::{
    decode_header, encode_frame_datagram, ipv4_destination, load_frame, HandshakeMessage,
    HandshakeResponse, MessageType, SessionId, StartMessage,
};
use sdtl_crypto::{IdentityKeypair, SessionCipher};
use tracing::{debug, info, warn};

use crate::registry::{HandshakeState, Registry, RegistryError};

/// A datagram ready to be written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Bytes,
    pub dest: SocketAddr,
}

/// Why an inbound datagram was discarded.
#[derive(Debug, thiserror::Error)]
pub enum DropReason {
    #[error(transparent)]
    Protocol(#[from] sdtl_core::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("unexpected {0:?} message")]
    UnexpectedMessage(MessageType),

    #[error("connection {ip} is {state:?}, expected {expected:?}")]
    InvalidState {
        ip: Ipv4Addr,
        state: HandshakeState,
        expected: HandshakeState,
    },

    #[error("session id mismatch: got {got}, bound {bound}")]
    SessionMismatch { got: SessionId, bound: SessionId },

    #[error("destination {0} is not ready")]
    DestinationNotReady(Ipv4Addr),

    #[error("start for {ip} reuses session {session}")]
    ReplayedStart { ip: Ipv4Addr, session: SessionId },
}

/// Relay-side protocol state machine.
pub struct Dispatcher {
    registry: Registry,
    identity: IdentityKeypair,
}

impl Dispatcher {
    pub fn new(registry: Registry, identity: IdentityKeypair) -> Self {
        Self { registry, identity }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handle one datagram, logging it if dropped.
    pub fn dispatch(&mut self, datagram: &[u8], src: SocketAddr) -> Option<Datagram> {
        match self.handle_datagram(datagram, src) {
            Ok(reply) => reply,
            Err(reason) => {
                warn!(peer = %src, reason = %reason, "datagram dropped");
                None
            }
        }
    }

    /// Classify `datagram` by its header and run the matching handler.
    pub fn handle_datagram(
        &mut self,
        datagram: &[u8],
        src: SocketAddr,
    ) -> Result<Option<Datagram>, DropReason> {
        let (message_type, body) = decode_header(datagram)?;
        match message_type {
            MessageType::Start => self.handle_start(body, src).map(Some),
            MessageType::ClientResponse => self.handle_client_response(body, src).map(|()| None),
            MessageType::DataFrame => self.route_data_frame(body, src).map(Some),
            MessageType::ServerResponse => Err(DropReason::UnexpectedMessage(message_type)),
        }
    }

    /// Verify a Start and answer with a signed ServerResponse.
    ///
    /// A Start with a new session id discards any previous session of the
    /// connection. A repeat of the pending session's Start from its bound
    /// address gets the same ephemeral key again; any other reuse of a known
    /// session id is dropped.
    pub fn handle_start(&mut self, body: &[u8], src: SocketAddr) -> Result<Datagram, DropReason> {
        let claimed_ip = StartMessage::peek_virtual_ip(body)?;
        let conn = self.registry.lookup_by_virtual_ip(claimed_ip)?;
        let start = match HandshakeMessage::parse(MessageType::Start, conn.verify_key(), body)? {
            HandshakeMessage::Start(start) => start,
            other => return Err(DropReason::UnexpectedMessage(other.message_type())),
        };

        if conn.has_used_session(start.session_id) {
            let pending = conn.state() == HandshakeState::HandshakeResponded
                && conn.session_id() == Some(start.session_id)
                && conn.network_addr() == Some(src);
            let cipher = match conn.cipher() {
                Some(cipher) if pending => cipher,
                _ => {
                    return Err(DropReason::ReplayedStart {
                        ip: start.virtual_ip,
                        session: start.session_id,
                    })
                }
            };
            debug!(peer = %src, session = %start.session_id, "start retransmitted");
            let response = HandshakeResponse {
                session_id: start.session_id,
                ephemeral_key: *cipher.public_key(),
            };
            return Ok(self.server_response(response, src));
        }

        let cipher = SessionCipher::generate();
        let response = HandshakeResponse {
            session_id: start.session_id,
            ephemeral_key: *cipher.public_key(),
        };
        self.registry.start_session(
            start.virtual_ip,
            start.session_id,
            cipher,
            src,
            Instant::now(),
        )?;

        info!(
            peer = %src,
            ip = %start.virtual_ip,
            session = %start.session_id,
            "handshake started"
        );

        Ok(self.server_response(response, src))
    }

    fn server_response(&self, response: HandshakeResponse, dest: SocketAddr) -> Datagram {
        Datagram {
            payload: HandshakeMessage::ServerResponse(response).to_datagram(&self.identity),
            dest,
        }
    }

    /// Finish the handshake bound to `src`.
    pub fn handle_client_response(&mut self, body: &[u8], src: SocketAddr) -> Result<(), DropReason> {
        let conn = self.registry.lookup_by_network_address_mut(src)?;
        if conn.state() != HandshakeState::HandshakeResponded {
            return Err(DropReason::InvalidState {
                ip: conn.virtual_ip(),
                state: conn.state(),
                expected: HandshakeState::HandshakeResponded,
            });
        }

        let response =
            match HandshakeMessage::parse(MessageType::ClientResponse, conn.verify_key(), body)? {
                HandshakeMessage::ClientResponse(response) => response,
                other => return Err(DropReason::UnexpectedMessage(other.message_type())),
            };

        let bound = conn.session_id().unwrap_or_default();
        if response.session_id != bound {
            return Err(DropReason::SessionMismatch {
                got: response.session_id,
                bound,
            });
        }

        conn.complete_handshake(&response.ephemeral_key, Instant::now())?;

        info!(
            peer = %src,
            ip = %conn.virtual_ip(),
            session = %bound,
            "handshake complete"
        );
        Ok(())
    }

    /// Open a frame from `src`, and re-seal it for the connection owning the
    /// packet's IPv4 destination.
    pub fn route_data_frame(&mut self, body: &[u8], src: SocketAddr) -> Result<Datagram, DropReason> {
        let sender = self.registry.lookup_by_network_address_mut(src)?;
        if !sender.is_ready() {
            return Err(DropReason::InvalidState {
                ip: sender.virtual_ip(),
                state: sender.state(),
                expected: HandshakeState::Ready,
            });
        }
        let cipher = sender.cipher().ok_or(sdtl_core::Error::NotEstablished)?;
        let packet = load_frame(cipher, body)?;
        let dest_ip = ipv4_destination(&packet)?;
        sender.touch(Instant::now());
        let sender_ip = sender.virtual_ip();

        let dest = self.registry.lookup_by_virtual_ip(dest_ip)?;
        let (cipher, dest_addr) = match (dest.is_ready(), dest.cipher(), dest.network_addr()) {
            (true, Some(cipher), Some(addr)) => (cipher, addr),
            _ => return Err(DropReason::DestinationNotReady(dest_ip)),
        };
        let payload = encode_frame_datagram(cipher, &packet)?;

        debug!(from = %sender_ip, to = %dest_ip, len = packet.len(), "frame routed");
        Ok(Datagram {
            payload,
            dest: dest_addr,
        })
    }

    /// Close connections idle for at least `timeout`.
    pub fn sweep_idle(&mut self, timeout: Duration) -> usize {
        let closed = self.registry.close_idle(Instant::now(), timeout);
        for ip in &closed {
            info!(ip = %ip, "idle session closed");
        }
        closed.len()
    }
}
