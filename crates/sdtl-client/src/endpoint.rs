//! Single-peer SDTL endpoint.
//!
//! [`Endpoint::connect`] runs the initiator side of the handshake against a
//! relay (or a peer running [`Endpoint::accept`]). Both sides retransmit on a
//! doubling deadline and ignore anything that does not come from the expected
//! address, carry the expected message type, verify, and match the session id.
//!
//! Once established, [`Endpoint::send`] and [`Endpoint::recv`] move sealed IP
//! packets. They take `&self`, so one task can send while another receives.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use sdtl_core::{
    decode_header, encode_frame_datagram, load_frame, HandshakeMessage, HandshakeResponse,
    MessageType, SessionId, StartMessage, MAX_DATAGRAM_SIZE,
};
use sdtl_crypto::{IdentityKeypair, PeerIdentity, SessionCipher};
use tokio::net::UdpSocket;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::error::ClientError;

const DEFAULT_HANDSHAKE_ATTEMPTS: u32 = 3;
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Handshake retransmission schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Wait after the first send; doubled after every timeout.
    pub initial_timeout: Duration,
    pub attempts: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            initial_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
        }
    }
}

/// Established session with one peer.
#[derive(Debug)]
pub struct Endpoint {
    socket: UdpSocket,
    peer: SocketAddr,
    session_id: SessionId,
    cipher: SessionCipher,
}

impl Endpoint {
    /// Open a session with `server` as the initiator.
    pub async fn connect(
        socket: UdpSocket,
        server: SocketAddr,
        identity: &IdentityKeypair,
        server_key: &PeerIdentity,
        virtual_ip: Ipv4Addr,
        config: &HandshakeConfig,
    ) -> Result<Self, ClientError> {
        let session_id = SessionId::random();
        let start = HandshakeMessage::Start(StartMessage {
            virtual_ip,
            session_id,
        })
        .to_datagram(identity);

        info!(server = %server, ip = %virtual_ip, session = %session_id, "starting handshake");

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut wait = config.initial_timeout;
        for attempt in 1..=config.attempts {
            socket.send_to(&start, server).await?;
            debug!("sent start (attempt {}/{})", attempt, config.attempts);

            let deadline = Instant::now() + wait;
            while let Some((message, _)) = recv_handshake(
                &socket,
                &mut buf,
                MessageType::ServerResponse,
                Some(server),
                server_key,
                Some(deadline),
            )
            .await?
            {
                if message.session_id() != session_id {
                    debug!(got = %message.session_id(), "ignoring response for another session");
                    continue;
                }
                let HandshakeMessage::ServerResponse(response) = message else {
                    continue;
                };

                let mut cipher = SessionCipher::generate();
                cipher.derive_shared(&response.ephemeral_key)?;
                let reply = HandshakeMessage::ClientResponse(HandshakeResponse {
                    session_id,
                    ephemeral_key: *cipher.public_key(),
                })
                .to_datagram(identity);
                socket.send_to(&reply, server).await?;

                info!(server = %server, session = %session_id, "handshake complete");
                return Ok(Self {
                    socket,
                    peer: server,
                    session_id,
                    cipher,
                });
            }
            wait *= 2;
        }

        Err(ClientError::HandshakeTimeout {
            attempts: config.attempts,
        })
    }

    /// Wait for a Start signed by `peer_key` and complete the handshake as
    /// the responder. With `expected` set, Starts from any other address are
    /// ignored.
    ///
    /// Waiting for the Start has no deadline; the ServerResponse is
    /// retransmitted on the same schedule as [`Endpoint::connect`].
    pub async fn accept(
        socket: UdpSocket,
        expected: Option<SocketAddr>,
        identity: &IdentityKeypair,
        peer_key: &PeerIdentity,
        config: &HandshakeConfig,
    ) -> Result<Self, ClientError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (start, peer) = loop {
            let received =
                recv_handshake(&socket, &mut buf, MessageType::Start, expected, peer_key, None)
                    .await?;
            if let Some((HandshakeMessage::Start(start), src)) = received {
                break (start, src);
            }
        };
        let session_id = start.session_id;
        info!(peer = %peer, ip = %start.virtual_ip, session = %session_id, "handshake requested");

        let mut cipher = SessionCipher::generate();
        let reply = HandshakeMessage::ServerResponse(HandshakeResponse {
            session_id,
            ephemeral_key: *cipher.public_key(),
        })
        .to_datagram(identity);

        let mut wait = config.initial_timeout;
        for attempt in 1..=config.attempts {
            socket.send_to(&reply, peer).await?;
            debug!("sent server response (attempt {}/{})", attempt, config.attempts);

            let deadline = Instant::now() + wait;
            while let Some((message, _)) = recv_handshake(
                &socket,
                &mut buf,
                MessageType::ClientResponse,
                Some(peer),
                peer_key,
                Some(deadline),
            )
            .await?
            {
                if message.session_id() != session_id {
                    continue;
                }
                let HandshakeMessage::ClientResponse(response) = message else {
                    continue;
                };

                cipher.derive_shared(&response.ephemeral_key)?;
                info!(peer = %peer, session = %session_id, "handshake complete");
                return Ok(Self {
                    socket,
                    peer,
                    session_id,
                    cipher,
                });
            }
            wait *= 2;
        }

        Err(ClientError::HandshakeTimeout {
            attempts: config.attempts,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Seal `packet` and send it to the peer.
    pub async fn send(&self, packet: &[u8]) -> Result<(), ClientError> {
        let datagram = encode_frame_datagram(&self.cipher, packet)?;
        self.socket.send_to(&datagram, self.peer).await?;
        Ok(())
    }

    /// Next packet from the peer.
    ///
    /// Datagrams from other addresses, non-data messages and frames that fail
    /// to open are skipped. Only socket errors are returned.
    pub async fn recv(&self) -> Result<Vec<u8>, ClientError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, src) = self.socket.recv_from(&mut buf).await?;
            if src != self.peer {
                debug!("ignoring datagram from unexpected peer {}", src);
                continue;
            }

            match decode_header(&buf[..len]) {
                Ok((MessageType::DataFrame, body)) => match load_frame(&self.cipher, body) {
                    Ok(packet) => return Ok(packet),
                    Err(e) => warn!(peer = %src, reason = %e, "frame dropped"),
                },
                Ok((message_type, _)) => debug!("ignoring {:?} after handshake", message_type),
                Err(e) => debug!(peer = %src, reason = %e, "ignoring malformed datagram"),
            }
        }
    }
}

/// Read until a verified handshake message of `expected` type arrives from
/// `from` (any address if `None`). Returns `None` once `deadline` passes.
async fn recv_handshake(
    socket: &UdpSocket,
    buf: &mut [u8],
    expected: MessageType,
    from: Option<SocketAddr>,
    verify_key: &PeerIdentity,
    deadline: Option<Instant>,
) -> Result<Option<(HandshakeMessage, SocketAddr)>, ClientError> {
    loop {
        let (len, src) = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                match time::timeout(deadline - now, socket.recv_from(buf)).await {
                    Ok(received) => received?,
                    Err(_) => return Ok(None),
                }
            }
            None => socket.recv_from(buf).await?,
        };

        if matches!(from, Some(from) if from != src) {
            debug!("ignoring handshake packet from unexpected peer {}", src);
            continue;
        }

        let (message_type, body) = match decode_header(&buf[..len]) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(peer = %src, reason = %e, "ignoring malformed datagram");
                continue;
            }
        };
        if message_type != expected {
            debug!("ignoring {:?} while waiting for {:?}", message_type, expected);
            continue;
        }

        match HandshakeMessage::parse(message_type, verify_key, body) {
            Ok(message) => return Ok(Some((message, src))),
            Err(e) => warn!(peer = %src, reason = %e, "handshake message dropped"),
        }
    }
}
