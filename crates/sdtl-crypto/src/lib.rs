//! Cryptographic primitives for SDTL.
//!
//! This crate provides:
//! - ECDSA P-256 identity keys used to sign handshake messages
//! - Ephemeral P-256 ECDH session ciphers sealing data with AES-256-GCM
//!
//! # Design
//!
//! Every handshake generates a fresh P-256 keypair on each side, which gives
//! forward secrecy. The long-term identity keys only authenticate the
//! handshake; they never touch payload data.
//!
//! The raw 32-byte ECDH output is used directly as the AES-256 key. Peers on
//! the wire depend on this, so no KDF is applied.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod identity;

pub use cipher::{Sealed, SessionCipher, NONCE_SIZE, PUBLIC_KEY_SIZE, TAG_SIZE};
pub use identity::{IdentityKeypair, PeerIdentity, SIGNATURE_SIZE};

use thiserror::Error;

/// Errors raised by the SDTL crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("key agreement failed: {0}")]
    KeyAgreement(String),

    #[error("authentication failed")]
    Authentication,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("session key not derived")]
    NotEstablished,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
