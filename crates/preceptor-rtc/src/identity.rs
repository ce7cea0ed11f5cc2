//! Deterministic participant identity derivation.

use sha2::{Digest, Sha256};

const IDENTITY_MODULUS: u64 = 1 << 31;

/// Derive a stable 31-bit channel identity from an opaque user id.
///
/// Digits-only ids that fit in 31 bits pass through unchanged so externally
/// assigned numeric uids keep their value on the channel. Everything else,
/// including oversized digit strings, is hashed and reduced modulo 2^31.
/// The mapping is pure: the same `user_id` always yields the same identity,
/// across calls and across processes.
pub fn participant_identity(user_id: &str) -> u32 {
    if !user_id.is_empty() && user_id.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = user_id.parse::<u64>() {
            if n < IDENTITY_MODULUS {
                return n as u32;
            }
        }
    }

    let digest = Sha256::digest(user_id.as_bytes());
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(raw) % IDENTITY_MODULUS) as u32
}
