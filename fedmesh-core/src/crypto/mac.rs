//! SipHash-2-4 message authentication.
//!
//! Tags are 128-bit SipHash-2-4 digests over the plaintext, keyed with the
//! first 16 bytes of the session key. The tag travels with the ciphertext
//! and is verified after opening, so only endpoints holding the session
//! key can detect tampering (end-to-end, not hop-by-hop).

use crate::error::{FedError, Result};
use siphasher::sip128::{Hasher128, SipHasher24};
use std::hash::Hasher;

/// Bytes of key material consumed from the front of the session key.
pub const MAC_KEY_LEN: usize = 16;

/// Tag size in bytes.
pub const MAC_LEN: usize = 16;

/// Computes the tag for `message` under the leading 16 bytes of `key`.
pub fn generate_mac(key: &[u8], message: &[u8]) -> Result<[u8; MAC_LEN]> {
    let key: &[u8; MAC_KEY_LEN] = key
        .get(..MAC_KEY_LEN)
        .and_then(|k| k.try_into().ok())
        .ok_or_else(|| FedError::crypto(format!("MAC key must be at least {MAC_KEY_LEN} bytes")))?;

    let mut hasher = SipHasher24::new_with_key(key);
    hasher.write(message);
    Ok(hasher.finish128().as_bytes())
}

/// True when `expected` is the tag of `message` under `key`.
#[must_use]
pub fn validate_mac(key: &[u8], message: &[u8], expected: &[u8]) -> bool {
    match generate_mac(key, message) {
        Ok(actual) => actual.as_slice() == expected,
        Err(_) => false,
    }
}
