//! # Key Derivation Functions
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    KEY DERIVATION                                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Packet key                                                            │
//! │    HKDF-SHA256(ikm = X25519 shared secret,                             │
//! │                salt = sorted(pub_a, pub_b),                            │
//! │                info = "wolke-packet-encryption-v1")                    │
//! │                                                                         │
//! │  Escrow key                                                            │
//! │    PBKDF2-HMAC-SHA256(password, salt, 120,000 rounds) → 32 bytes       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The escrow parameters are fixed by records already stored on servers;
//! changing them makes existing backups unreadable.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// PBKDF2 rounds for escrow keys
pub const PBKDF2_ITERATIONS: u32 = 120_000;

/// Bytes of SHA-256 kept in a fingerprint
const FINGERPRINT_BYTES: usize = 8;

/// Domain separation strings for HKDF
pub mod domain {
    /// Packet content encryption
    pub const PACKET_ENCRYPTION: &[u8] = b"wolke-packet-encryption-v1";
}

/// Derive a packet key from an X25519 shared secret
pub fn derive_packet_key(dh_output: &[u8; 32], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), dh_output);

    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(domain::PACKET_ENCRYPTION, &mut key[..])
        .map_err(|_| Error::KeyDerivationFailed("Failed to derive packet key".into()))?;

    Ok(key)
}

/// Derive the escrow key from a password and salt
///
/// CPU-bound (120,000 rounds). Run it on a blocking worker.
pub fn derive_password_key(password: &str, salt: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key[..]);
    key
}

/// Short hex fingerprint of a public key
pub fn compute_key_fingerprint(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

// ============================================================================
// TESTS
// ============================================================================
