//! ECDSA P-256 identity keys.
//!
//! Every host owns one long-term signing keypair. Peers are configured with
//! each other's verifying key and use it to authenticate handshake messages.
//!
//! Keys are stored as PEM: PKCS#8 for the private key, SubjectPublicKeyInfo
//! for the public key.
//!
//! # Example
//!
//! ```
//! use sdtl_crypto::identity::IdentityKeypair;
//!
//! let keypair = IdentityKeypair::generate();
//! let peer = keypair.public_identity();
//!
//! let signature = keypair.sign(b"handshake bytes");
//! assert!(peer.verify(b"handshake bytes", &signature));
//! assert!(!peer.verify(b"tampered bytes", &signature));
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;

use crate::CryptoError;

/// Size of a fixed-width `r || s` ECDSA P-256 signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Long-term ECDSA P-256 signing keypair.
///
/// The signing key is zeroized on drop by `p256`.
pub struct IdentityKeypair {
    signing_key: SigningKey,
}

impl IdentityKeypair {
    /// Generate a new random keypair using the OS CSPRNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Create from a raw 32-byte big-endian scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("P-256 private key: {e}")))?;
        Ok(Self { signing_key })
    }

    /// Parse a PKCS#8 PEM private key.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| CryptoError::InvalidKey(format!("PKCS#8 private key: {e}")))?;
        Ok(Self { signing_key })
    }

    /// Encode the private key as PKCS#8 PEM.
    pub fn to_pem(&self) -> Result<String, CryptoError> {
        let pem = self
            .signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(format!("PKCS#8 encoding: {e}")))?;
        Ok(String::clone(&pem))
    }

    /// The verifying half, as handed to peers.
    pub fn public_identity(&self) -> PeerIdentity {
        PeerIdentity {
            verifying_key: *self.signing_key.verifying_key(),
        }
    }

    /// Sign a message, producing a fixed-width `r || s` signature.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let signature: Signature = self.signing_key.sign(message);
        let mut out = [0u8; SIGNATURE_SIZE];
        out.copy_from_slice(&signature.to_bytes());
        out
    }

    /// Save the keypair to two PEM files.
    ///
    /// Private key is saved with restricted permissions (0600 on Unix).
    pub fn save(
        &self,
        private_path: impl AsRef<Path>,
        public_path: impl AsRef<Path>,
    ) -> Result<(), CryptoError> {
        let private_path = private_path.as_ref();
        fs::write(private_path, self.to_pem()?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(private_path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(private_path, perms)?;
        }

        fs::write(public_path, self.public_identity().to_pem()?)?;
        Ok(())
    }

    /// Load a keypair from a PKCS#8 PEM file.
    pub fn load(private_path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let pem = fs::read_to_string(private_path)?;
        Self::from_pem(&pem)
    }
}

impl fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeypair")
            .field("public", &self.public_identity())
            .finish_non_exhaustive()
    }
}

/// Public identity (verifying key only).
#[derive(Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    verifying_key: VerifyingKey,
}

impl PeerIdentity {
    /// Parse a SEC1-encoded public key (compressed or uncompressed).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let verifying_key = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("P-256 public key: {e}")))?;
        Ok(Self { verifying_key })
    }

    /// Parse a SubjectPublicKeyInfo PEM public key.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let verifying_key = VerifyingKey::from_public_key_pem(pem)
            .map_err(|e| CryptoError::InvalidKey(format!("SPKI public key: {e}")))?;
        Ok(Self { verifying_key })
    }

    /// Encode as SubjectPublicKeyInfo PEM.
    pub fn to_pem(&self) -> Result<String, CryptoError> {
        self.verifying_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(format!("SPKI encoding: {e}")))
    }

    /// Load a verifying key from a PEM file.
    pub fn load(public_path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let pem = fs::read_to_string(public_path)?;
        Self::from_pem(&pem)
    }

    /// Uncompressed SEC1 encoding (65 bytes).
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.verifying_key
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// Verify a fixed-width `r || s` signature.
    ///
    /// Malformed signatures (including all-zero) verify as `false`.
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> bool {
        let sig = match Signature::from_slice(signature) {
            Ok(s) => s,
            Err(_) => return false,
        };
        self.verifying_key.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sec1 = self.to_sec1_bytes();
        write!(f, "PeerIdentity(")?;
        for byte in &sec1[1..9] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let keypair = IdentityKeypair::generate();
        let peer = keypair.public_identity();
        let message = b"hello sdtl";

        let signature = keypair.sign(message);
        assert!(peer.verify(message, &signature));

        assert!(!peer.verify(b"wrong message", &signature));
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let signer = IdentityKeypair::generate();
        let other = IdentityKeypair::generate().public_identity();

        let signature = signer.sign(b"payload");
        assert!(!other.verify(b"payload", &signature));
    }

    #[test]
    fn test_zero_signature_is_rejected() {
        let peer = IdentityKeypair::generate().public_identity();
        assert!(!peer.verify(b"payload", &[0u8; SIGNATURE_SIZE]));
    }

    #[test]
    fn test_pem_roundtrip() {
        let keypair = IdentityKeypair::generate();
        let pem = keypair.to_pem().unwrap();
        let restored = IdentityKeypair::from_pem(&pem).unwrap();
        assert_eq!(restored.public_identity(), keypair.public_identity());

        let public_pem = keypair.public_identity().to_pem().unwrap();
        let peer = PeerIdentity::from_pem(&public_pem).unwrap();
        assert_eq!(peer, keypair.public_identity());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let private_path = dir.path().join("host_private.pem");
        let public_path = dir.path().join("host_public.pem");

        let keypair = IdentityKeypair::generate();
        keypair.save(&private_path, &public_path).unwrap();

        let loaded = IdentityKeypair::load(&private_path).unwrap();
        let peer = PeerIdentity::load(&public_path).unwrap();

        let signature = loaded.sign(b"after reload");
        assert!(peer.verify(b"after reload", &signature));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&private_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_garbage_pem_is_rejected() {
        assert!(IdentityKeypair::from_pem("not a key").is_err());
        assert!(PeerIdentity::from_pem("-----BEGIN PUBLIC KEY-----\n-----END PUBLIC KEY-----\n").is_err());
    }
}
