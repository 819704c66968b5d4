//! SDTL client: the single-peer endpoint and the tunnel that connects it to
//! a local virtual interface.

#![forbid(unsafe_code)]

pub mod endpoint;
pub mod error;
pub mod tunnel;

pub use endpoint::{Endpoint, HandshakeConfig};
pub use error::ClientError;
pub use tunnel::{run_tunnel, DEFAULT_MTU};
