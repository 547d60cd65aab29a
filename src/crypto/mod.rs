//! # Cryptography Module
//!
//! Primitives under the key reconciliation and escrow layers.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Identity KeyPair (X25519)                                             │
//! │  ─────────────────────────                                              │
//! │  privateKey / publicKey, each the base64 of 32 bytes (44 chars)        │
//! │                                                                         │
//! │  Packet content (seal / open)                                          │
//! │  ────────────────────────────                                           │
//! │  1. X25519 DH: our private × their public → shared secret             │
//! │  2. HKDF-SHA256(salt = both public keys in sorted order,              │
//! │                 info = "wolke-packet-encryption-v1") → 32-byte key    │
//! │  3. AES-256-GCM, random 96-bit nonce                                  │
//! │  → base64(nonce || ciphertext || tag)                                 │
//! │                                                                         │
//! │  Escrow key (see `escrow`)                                             │
//! │  ─────────────────────────                                              │
//! │  PBKDF2-HMAC-SHA256(password, 128-byte salt, 120,000 rounds)          │
//! │  → 32-byte AES-256-CBC key                                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Secret material is zeroized on drop and randomness comes from `OsRng`.

mod encryption;
mod kdf;
mod keys;

pub use encryption::{decrypt, encrypt, open, seal, EncryptionKey, Nonce, SharedSecret, NONCE_SIZE};
pub use kdf::{compute_key_fingerprint, derive_password_key, PBKDF2_ITERATIONS};
pub use keys::{decode_public_key, KeyPair, ENCODED_KEY_LEN};

/// Size of X25519 keys in bytes
pub const KEY_SIZE: usize = 32;
