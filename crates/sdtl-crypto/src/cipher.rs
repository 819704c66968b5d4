//! Ephemeral P-256 key agreement and AES-256-GCM session cipher.
//!
//! A [`SessionCipher`] is created per handshake attempt. It starts out holding
//! only an ephemeral keypair; once the peer's ephemeral public key arrives,
//! [`SessionCipher::derive_shared`] computes the ECDH secret, discards the
//! ephemeral private key and keys the AEAD.
//!
//! # Nonces
//!
//! Every `seal` draws a fresh 96-bit nonce from the OS CSPRNG. There is no
//! counter state to get out of sync, so datagrams may be lost or reordered.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::CryptoError;

/// AES-GCM nonce size.
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Uncompressed SEC1 P-256 point: `0x04 || x || y`.
pub const PUBLIC_KEY_SIZE: usize = 65;

/// Output of [`SessionCipher::seal`], with the tag split off the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

/// Per-session key material.
pub struct SessionCipher {
    /// Ephemeral private key; `None` once the shared secret is derived.
    secret: Option<SecretKey>,
    public_key: [u8; PUBLIC_KEY_SIZE],
    aead: Option<Aes256Gcm>,
}

impl SessionCipher {
    /// Generate a fresh ephemeral P-256 keypair.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let mut public_key = [0u8; PUBLIC_KEY_SIZE];
        public_key.copy_from_slice(secret.public_key().to_encoded_point(false).as_bytes());

        Self {
            secret: Some(secret),
            public_key,
            aead: None,
        }
    }

    /// Build a cipher directly from a 32-byte shared secret.
    ///
    /// The result has no ephemeral keypair; its public key is all zero.
    pub fn from_shared_secret(shared: &[u8; 32]) -> Self {
        Self {
            secret: None,
            public_key: [0u8; PUBLIC_KEY_SIZE],
            aead: Some(Aes256Gcm::new(shared.into())),
        }
    }

    /// Our ephemeral public key in uncompressed SEC1 form.
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public_key
    }

    /// Whether the shared secret has been derived and the AEAD is keyed.
    pub fn is_established(&self) -> bool {
        self.aead.is_some()
    }

    /// Run ECDH against the peer's ephemeral public key and key the AEAD.
    ///
    /// The peer key must be a 65-byte uncompressed point on P-256. On failure
    /// the cipher is left untouched so a later, valid key can still be used.
    pub fn derive_shared(&mut self, peer_public: &[u8]) -> Result<(), CryptoError> {
        if peer_public.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::KeyAgreement(format!(
                "P-256 public key must be {PUBLIC_KEY_SIZE} bytes, got {}",
                peer_public.len()
            )));
        }
        if peer_public[0] != 0x04 {
            return Err(CryptoError::KeyAgreement(
                "P-256 public key must use uncompressed format".into(),
            ));
        }

        let encoded = EncodedPoint::from_bytes(peer_public)
            .map_err(|_| CryptoError::KeyAgreement("malformed P-256 point".into()))?;
        let peer = Option::<PublicKey>::from(PublicKey::from_encoded_point(&encoded))
            .ok_or_else(|| CryptoError::KeyAgreement("point is not on P-256".into()))?;

        let secret = self
            .secret
            .take()
            .ok_or_else(|| CryptoError::KeyAgreement("shared secret already derived".into()))?;

        let shared = diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(shared.raw_secret_bytes().as_slice());

        self.aead = Some(Aes256Gcm::new((&*key).into()));
        Ok(())
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
        let aead = self.aead.as_ref().ok_or(CryptoError::NotEstablished)?;

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let mut ciphertext = aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        // AES-GCM emits ciphertext || tag
        let tag_offset = ciphertext.len() - TAG_SIZE;
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&ciphertext[tag_offset..]);
        ciphertext.truncate(tag_offset);

        Ok(Sealed {
            nonce,
            tag,
            ciphertext,
        })
    }

    /// Decrypt and authenticate.
    pub fn open(
        &self,
        ciphertext: &[u8],
        tag: &[u8; TAG_SIZE],
        nonce: &[u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, CryptoError> {
        let aead = self.aead.as_ref().ok_or(CryptoError::NotEstablished)?;

        let mut combined = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
        combined.extend_from_slice(ciphertext);
        combined.extend_from_slice(tag);

        aead.decrypt(Nonce::from_slice(nonce), combined.as_slice())
            .map_err(|_| CryptoError::Authentication)
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher")
            .field("established", &self.is_established())
            .finish_non_exhaustive()
    }
}
