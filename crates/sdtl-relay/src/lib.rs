//! SDTL relay.
//!
//! Terminates the signed handshake for every configured peer, then opens each
//! data frame, reads the IPv4 destination and re-seals the packet under the
//! destination peer's session. Peers never share a key with each other.

#![forbid(unsafe_code)]

pub mod dispatcher;
pub mod registry;
pub mod server;

pub use dispatcher::{Datagram, Dispatcher, DropReason};
pub use registry::{Connection, HandshakeState, Registry, RegistryError};
pub use server::{Inbound, Outbound, RelayServer, ServerOptions};
