//! Client error types.

use std::io;

use sdtl_crypto::CryptoError;
use thiserror::Error;

/// Errors surfaced by the client endpoint and tunnel.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No valid response within the retry budget.
    #[error("handshake timed out after {attempts} attempts")]
    HandshakeTimeout { attempts: u32 },

    #[error("protocol error: {0}")]
    Protocol(#[from] sdtl_core::Error),

    /// Socket or device failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The local interface returned end of stream.
    #[error("virtual interface closed")]
    DeviceClosed,
}

impl From<CryptoError> for ClientError {
    fn from(err: CryptoError) -> Self {
        Self::Protocol(err.into())
    }
}
