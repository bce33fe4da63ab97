//! Argon2id wrapping of identity key material at rest.
//!
//! When the user sets a passphrase, the identity secret is stored as
//!
//! ```text
//! version(1) || salt(16) || nonce(12) || ciphertext || tag
//! ```
//!
//! with the AEAD key derived by Argon2id (t=3, m=64 MiB, p=4). Without a
//! passphrase the secret is stored raw in OS secure storage.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

use crate::chacha20;
use crate::{CryptoError, Result};

/// Blob format version.
pub const WRAP_VERSION: u8 = 1;

/// Memory cost in KiB (64 MiB).
pub const WRAP_M_COST: u32 = 64 * 1024;
/// Time cost (iterations).
pub const WRAP_T_COST: u32 = 3;
/// Parallelism lanes.
pub const WRAP_P_COST: u32 = 4;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

const HEADER_LEN: usize = 1 + SALT_LEN;

/// Derive a 32-byte wrapping key from a passphrase and salt.
pub fn derive_wrap_key(passphrase: &[u8], salt: &[u8]) -> Result<[u8; 32]> {
    derive_key_custom(passphrase, salt, WRAP_M_COST, WRAP_T_COST, WRAP_P_COST)
}

/// Derive with custom parameters (tests use small costs).
pub fn derive_key_custom(
    passphrase: &[u8],
    salt: &[u8],
    m_cost: u32,
    t_cost: u32,
    p_cost: u32,
) -> Result<[u8; 32]> {
    let params = Params::new(m_cost, t_cost, p_cost, Some(32))
        .map_err(|e| CryptoError::Internal(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; 32];
    argon2
        .hash_password_into(passphrase, salt, &mut output)
        .map_err(|e| CryptoError::Internal(format!("argon2: {e}")))?;
    Ok(output)
}

/// Wrap a secret under a passphrase with production parameters.
pub fn wrap(passphrase: &[u8], secret: &[u8]) -> Result<Vec<u8>> {
    wrap_custom(passphrase, secret, WRAP_M_COST, WRAP_T_COST, WRAP_P_COST)
}

/// Wrap with custom Argon2id parameters.
pub fn wrap_custom(
    passphrase: &[u8],
    secret: &[u8],
    m_cost: u32,
    t_cost: u32,
    p_cost: u32,
) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let key = derive_key_custom(passphrase, &salt, m_cost, t_cost, p_cost)?;
    let sealed = chacha20::encrypt_prepend_nonce(&key, secret)?;

    let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
    out.push(WRAP_VERSION);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Unwrap a blob produced by [`wrap`].
pub fn unwrap(passphrase: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
    unwrap_custom(passphrase, blob, WRAP_M_COST, WRAP_T_COST, WRAP_P_COST)
}

/// Unwrap with custom Argon2id parameters.
pub fn unwrap_custom(
    passphrase: &[u8],
    blob: &[u8],
    m_cost: u32,
    t_cost: u32,
    p_cost: u32,
) -> Result<Vec<u8>> {
    if blob.len() < HEADER_LEN + chacha20::NONCE_SIZE + chacha20::TAG_SIZE {
        return Err(CryptoError::InvalidEncoding("wrapped blob too short".into()));
    }
    if blob[0] != WRAP_VERSION {
        return Err(CryptoError::InvalidEncoding(format!(
            "unknown wrap version {}",
            blob[0]
        )));
    }

    let salt = &blob[1..HEADER_LEN];
    let key = derive_key_custom(passphrase, salt, m_cost, t_cost, p_cost)?;
    chacha20::decrypt_prepend_nonce(&key, &blob[HEADER_LEN..])
}
