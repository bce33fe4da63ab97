//! ChaCha20-Poly1305 AEAD encryption (RFC 8439).
//!
//! All payload encryption in Zajel uses this AEAD: peer session traffic,
//! channel chunk content, sealed dead drops, and wrapped identities. The
//! convenience forms [`encrypt_prepend_nonce`] / [`decrypt_prepend_nonce`]
//! carry the random nonce as the first 12 bytes of the blob, which is the
//! wire layout for session messages and chunk payloads.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;

use crate::{CryptoError, Result};

/// Nonce size for ChaCha20-Poly1305 (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Key size for ChaCha20-Poly1305 (256 bits).
pub const KEY_SIZE: usize = 32;

/// Authentication tag size (128 bits).
pub const TAG_SIZE: usize = 16;

/// Encrypt with an explicit nonce.
///
/// The nonce must never be reused with the same key. Returns ciphertext
/// with the 16-byte tag appended.
pub fn encrypt(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::Internal("chacha20 encrypt".into()))
}

/// Decrypt with an explicit nonce.
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::BadMac)
}

/// Encrypt with a fresh random nonce, prepended to the output:
/// `nonce || ciphertext || tag`.
pub fn encrypt_prepend_nonce(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let ciphertext = encrypt(key, &nonce, plaintext)?;
    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a `nonce || ciphertext || tag` blob.
pub fn decrypt_prepend_nonce(key: &[u8; KEY_SIZE], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::InvalidEncoding("ciphertext too short".into()));
    }
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&blob[..NONCE_SIZE]);
    decrypt(key, &nonce, &blob[NONCE_SIZE..])
}
