//! Authenticated payload sealing.
//!
//! ChaCha20-Poly1305 with a fresh random nonce prefixed to every
//! ciphertext. The receiving side splits the prefix back off; there is no
//! per-connection nonce state to synchronize.

use crate::error::{FedError, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

/// Symmetric key size in bytes.
pub const KEY_LEN: usize = 32;

/// Nonce prefix size in bytes.
pub const NONCE_LEN: usize = 12;

/// Poly1305 tag overhead in bytes.
pub const TAG_LEN: usize = 16;

/// Generates a fresh random symmetric key.
#[must_use]
pub fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encrypts `plaintext` under `key`, returning `nonce || ciphertext`.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| FedError::crypto(format!("key must be {KEY_LEN} bytes")))?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| FedError::crypto("encryption failure"))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypts `nonce || ciphertext` produced by [`seal`].
pub fn open(key: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(FedError::crypto("sealed payload too short"));
    }

    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| FedError::crypto(format!("key must be {KEY_LEN} bytes")))?;

    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| FedError::crypto("decryption failure"))
}
