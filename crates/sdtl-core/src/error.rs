//! Protocol error taxonomy.

use sdtl_crypto::CryptoError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while decoding or processing SDTL messages.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or wrongly sized wire data.
    #[error("malformed message: {0}")]
    Format(String),

    /// A signed field did not verify against the expected key.
    #[error("invalid signature")]
    Signature,

    /// AEAD tag mismatch.
    #[error("authentication failed")]
    Authentication,

    /// Peer ephemeral key is unusable.
    #[error("key agreement failed: {0}")]
    KeyAgreement(String),

    #[error("protocol mismatch: version 0x{0:02x}, expected 0x{1:02x}")]
    ProtocolMismatch(u8, u8),

    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("session not established")]
    NotEstablished,

    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Authentication => Self::Authentication,
            CryptoError::KeyAgreement(msg) => Self::KeyAgreement(msg),
            CryptoError::NotEstablished => Self::NotEstablished,
            other => Self::Crypto(other),
        }
    }
}
