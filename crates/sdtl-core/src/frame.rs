//! Data frame codec.
//!
//! ```text
//! +-----------+-----------+----------------------+
//! | nonce(12) |  tag(16)  |  ciphertext (..)     |
//! +-----------+-----------+----------------------+
//! ```
//!
//! The tag sits between nonce and ciphertext, not after the ciphertext as
//! AES-GCM emits it. Peers depend on this order.

use bytes::Bytes;
use sdtl_crypto::{SessionCipher, NONCE_SIZE, TAG_SIZE};

use crate::error::{Error, Result};
use crate::{encode_datagram, MessageType};

const TAG_OFFSET: usize = NONCE_SIZE;
const CIPHERTEXT_OFFSET: usize = NONCE_SIZE + TAG_SIZE;

/// Smallest valid frame body: nonce plus tag with an empty ciphertext.
pub const MIN_FRAME_SIZE: usize = CIPHERTEXT_OFFSET;

/// Seal `plaintext` into a frame body.
pub fn dump_frame(cipher: &SessionCipher, plaintext: &[u8]) -> Result<Vec<u8>> {
    let sealed = cipher.seal(plaintext)?;

    let mut body = Vec::with_capacity(CIPHERTEXT_OFFSET + sealed.ciphertext.len());
    body.extend_from_slice(&sealed.nonce);
    body.extend_from_slice(&sealed.tag);
    body.extend_from_slice(&sealed.ciphertext);
    Ok(body)
}

/// Open a frame body.
pub fn load_frame(cipher: &SessionCipher, body: &[u8]) -> Result<Vec<u8>> {
    if body.len() < MIN_FRAME_SIZE {
        return Err(Error::Format(format!(
            "data frame is {} bytes, minimum {}",
            body.len(),
            MIN_FRAME_SIZE
        )));
    }

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&body[..TAG_OFFSET]);
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&body[TAG_OFFSET..CIPHERTEXT_OFFSET]);

    Ok(cipher.open(&body[CIPHERTEXT_OFFSET..], &tag, &nonce)?)
}

/// Seal `plaintext` and prefix the data frame header.
pub fn encode_frame_datagram(cipher: &SessionCipher, plaintext: &[u8]) -> Result<Bytes> {
    let body = dump_frame(cipher, plaintext)?;
    Ok(encode_datagram(MessageType::DataFrame, &body))
}
