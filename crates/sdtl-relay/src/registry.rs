//! Connection registry.
//!
//! One [`Connection`] per configured peer, reachable by its virtual IP for the
//! lifetime of the relay and by its network address while a handshake is in
//! progress or complete.
//!
//! State machine:
//! - `Closed -> HandshakeResponded`: a verified Start arrived
//! - `HandshakeResponded -> Ready`: matching ClientResponse, shared secret derived
//! - `* -> Closed`: explicit close, idle sweep, or a Start with a session id
//!   the connection has not used recently (re-enters `HandshakeResponded`
//!   with fresh session state)

use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use sdtl_core::SessionId;
use sdtl_crypto::{CryptoError, PeerIdentity, SessionCipher};

/// Session ids remembered per connection, across closes.
const SESSION_HISTORY: usize = 16;

/// Per-connection handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Closed,
    HandshakeResponded,
    Ready,
}

/// Registry lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no connection for virtual ip {0}")]
    VirtualIpNotFound(Ipv4Addr),
    #[error("no connection bound to {0}")]
    AddressNotFound(SocketAddr),
    #[error("virtual ip {0} already registered")]
    DuplicateEntry(Ipv4Addr),
    #[error("connection {ip} is {state:?}, expected HandshakeResponded")]
    NotResponded { ip: Ipv4Addr, state: HandshakeState },
    #[error(transparent)]
    KeyAgreement(#[from] CryptoError),
}

/// Session-scoped fields, present only outside `Closed`.
#[derive(Debug)]
struct Session {
    id: SessionId,
    cipher: SessionCipher,
}

/// A statically configured peer and its current session.
#[derive(Debug)]
pub struct Connection {
    virtual_ip: Ipv4Addr,
    verify_key: PeerIdentity,
    state: HandshakeState,
    session: Option<Session>,
    network_addr: Option<SocketAddr>,
    mtime: Option<Instant>,
    recent_sessions: VecDeque<SessionId>,
}

impl Connection {
    fn new(virtual_ip: Ipv4Addr, verify_key: PeerIdentity) -> Self {
        Self {
            virtual_ip,
            verify_key,
            state: HandshakeState::Closed,
            session: None,
            network_addr: None,
            mtime: None,
            recent_sessions: VecDeque::with_capacity(SESSION_HISTORY),
        }
    }

    pub fn virtual_ip(&self) -> Ipv4Addr {
        self.virtual_ip
    }

    /// Long-term key the peer signs its handshake messages with.
    pub fn verify_key(&self) -> &PeerIdentity {
        &self.verify_key
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == HandshakeState::Ready
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn cipher(&self) -> Option<&SessionCipher> {
        self.session.as_ref().map(|s| &s.cipher)
    }

    pub fn network_addr(&self) -> Option<SocketAddr> {
        self.network_addr
    }

    /// Last handshake or routing activity.
    pub fn mtime(&self) -> Option<Instant> {
        self.mtime
    }

    /// Whether a Start with `id` was already accepted for this peer, by the
    /// current session or one of the last few before it.
    pub fn has_used_session(&self, id: SessionId) -> bool {
        self.recent_sessions.contains(&id)
    }

    pub fn touch(&mut self, now: Instant) {
        self.mtime = Some(now);
    }

    /// Derive the session key from the peer's ephemeral key and move to
    /// `Ready`. Only valid in `HandshakeResponded`; on failure nothing
    /// changes.
    pub fn complete_handshake(
        &mut self,
        peer_ephemeral: &[u8],
        now: Instant,
    ) -> Result<(), RegistryError> {
        let not_responded = RegistryError::NotResponded {
            ip: self.virtual_ip,
            state: self.state,
        };
        let session = match (self.state, self.session.as_mut()) {
            (HandshakeState::HandshakeResponded, Some(session)) => session,
            _ => return Err(not_responded),
        };
        session.cipher.derive_shared(peer_ephemeral)?;
        self.state = HandshakeState::Ready;
        self.mtime = Some(now);
        Ok(())
    }

    fn remember_session(&mut self, id: SessionId) {
        if self.recent_sessions.len() == SESSION_HISTORY {
            self.recent_sessions.pop_front();
        }
        self.recent_sessions.push_back(id);
    }

    /// Session ids survive a reset so a captured Start cannot reopen them.
    fn reset(&mut self) {
        self.state = HandshakeState::Closed;
        self.session = None;
        self.network_addr = None;
        self.mtime = None;
    }
}

/// All configured connections, indexed by virtual IP and by network address.
#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<Ipv4Addr, Connection>,
    by_network_addr: HashMap<SocketAddr, Ipv4Addr>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configured peer. An existing entry for `virtual_ip` is left
    /// untouched.
    pub fn register_static(
        &mut self,
        virtual_ip: Ipv4Addr,
        verify_key: PeerIdentity,
    ) -> Result<(), RegistryError> {
        if self.connections.contains_key(&virtual_ip) {
            return Err(RegistryError::DuplicateEntry(virtual_ip));
        }
        self.connections
            .insert(virtual_ip, Connection::new(virtual_ip, verify_key));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn lookup_by_virtual_ip(&self, ip: Ipv4Addr) -> Result<&Connection, RegistryError> {
        self.connections
            .get(&ip)
            .ok_or(RegistryError::VirtualIpNotFound(ip))
    }

    pub fn lookup_by_virtual_ip_mut(
        &mut self,
        ip: Ipv4Addr,
    ) -> Result<&mut Connection, RegistryError> {
        self.connections
            .get_mut(&ip)
            .ok_or(RegistryError::VirtualIpNotFound(ip))
    }

    pub fn lookup_by_network_address(
        &self,
        addr: SocketAddr,
    ) -> Result<&Connection, RegistryError> {
        let ip = self
            .by_network_addr
            .get(&addr)
            .ok_or(RegistryError::AddressNotFound(addr))?;
        self.lookup_by_virtual_ip(*ip)
    }

    pub fn lookup_by_network_address_mut(
        &mut self,
        addr: SocketAddr,
    ) -> Result<&mut Connection, RegistryError> {
        let ip = *self
            .by_network_addr
            .get(&addr)
            .ok_or(RegistryError::AddressNotFound(addr))?;
        self.lookup_by_virtual_ip_mut(ip)
    }

    /// Point `addr` at the connection for `virtual_ip`.
    ///
    /// A connection previously bound to `addr` is closed, and any earlier
    /// address of this connection is unbound.
    pub fn bind_network_address(
        &mut self,
        addr: SocketAddr,
        virtual_ip: Ipv4Addr,
    ) -> Result<(), RegistryError> {
        if !self.connections.contains_key(&virtual_ip) {
            return Err(RegistryError::VirtualIpNotFound(virtual_ip));
        }

        if let Some(previous) = self.by_network_addr.get(&addr).copied() {
            if previous != virtual_ip {
                self.close(previous)?;
            }
        }

        let conn = self.lookup_by_virtual_ip_mut(virtual_ip)?;
        let stale = conn.network_addr.replace(addr);
        if let Some(stale) = stale.filter(|stale| *stale != addr) {
            self.by_network_addr.remove(&stale);
        }
        self.by_network_addr.insert(addr, virtual_ip);
        Ok(())
    }

    /// Replace whatever session `virtual_ip` had with a fresh one in
    /// `HandshakeResponded`, bound to `addr`.
    pub fn start_session(
        &mut self,
        virtual_ip: Ipv4Addr,
        session_id: SessionId,
        cipher: SessionCipher,
        addr: SocketAddr,
        now: Instant,
    ) -> Result<&Connection, RegistryError> {
        self.close(virtual_ip)?;
        self.bind_network_address(addr, virtual_ip)?;

        let conn = self.lookup_by_virtual_ip_mut(virtual_ip)?;
        conn.session = Some(Session {
            id: session_id,
            cipher,
        });
        conn.state = HandshakeState::HandshakeResponded;
        conn.mtime = Some(now);
        conn.remember_session(session_id);
        Ok(conn)
    }

    /// Clear all session state of `virtual_ip`. Closing a closed connection
    /// is a no-op.
    pub fn close(&mut self, virtual_ip: Ipv4Addr) -> Result<(), RegistryError> {
        let conn = self.lookup_by_virtual_ip_mut(virtual_ip)?;
        let addr = conn.network_addr;
        conn.reset();
        if let Some(addr) = addr {
            self.by_network_addr.remove(&addr);
        }
        Ok(())
    }

    /// Close every open connection idle for at least `timeout`.
    /// Returns the virtual IPs that were closed.
    pub fn close_idle(&mut self, now: Instant, timeout: Duration) -> Vec<Ipv4Addr> {
        let idle: Vec<Ipv4Addr> = self
            .connections
            .values()
            .filter(|conn| conn.state != HandshakeState::Closed)
            .filter(|conn| {
                conn.mtime
                    .map_or(true, |mtime| now.saturating_duration_since(mtime) >= timeout)
            })
            .map(|conn| conn.virtual_ip)
            .collect();

        for ip in &idle {
            // present: collected from the same map above
            let _ = self.close(*ip);
        }
        idle
    }
}
