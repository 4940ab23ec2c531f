//! Symmetric primitives for the secure variant, used as black boxes.
//!
//! - `seal` / `open`: authenticated payload encryption with a nonce prefix
//! - `mac`: SipHash-2-4 tags over plaintext, keyed by a key prefix

pub mod mac;
pub mod seal;

pub use mac::{generate_mac, validate_mac, MAC_KEY_LEN, MAC_LEN};
pub use seal::{generate_key, open, seal, KEY_LEN, NONCE_LEN};
