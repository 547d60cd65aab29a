//! # Packet Encryption
//!
//! AES-256-GCM under a key agreed between two identity key pairs.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      PACKET CONTENT SEALING                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Alice                                     Bob                          │
//! │  ─────                                     ───                          │
//! │  alice_private × bob_public       ==       bob_private × alice_public   │
//! │              │                                         │                │
//! │              ▼                                         ▼                │
//! │  HKDF(shared, salt = sorted(pub_alice, pub_bob)) → same packet key      │
//! │              │                                         │                │
//! │              ▼                                         ▼                │
//! │  AES-256-GCM encrypt (random nonce)  ───────►  AES-256-GCM decrypt      │
//! │                                                                         │
//! │  Wire content: base64(nonce[12] || ciphertext || tag[16])              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Either party can open what either party sealed, so the sender can read
//! back its own sent packets from history.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::kdf::derive_packet_key;
use super::keys::{decode_public_key, KeyPair};
use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// A nonce for AES-GCM encryption
///
/// Random per message. Never reuse a nonce with the same key.
#[derive(Clone, Copy, Debug)]
pub struct Nonce(pub [u8; NONCE_SIZE]);

impl Nonce {
    /// Generate a cryptographically random nonce
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from existing bytes
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// A shared secret derived from X25519 key exchange
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: [u8; 32],
}

impl SharedSecret {
    /// Create from raw DH output
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Derive the packet key for the pair of public keys
    pub fn derive_key(&self, salt: &[u8]) -> Result<EncryptionKey> {
        let key = derive_packet_key(&self.bytes, salt)?;
        Ok(EncryptionKey(*key))
    }
}

/// An AES-256-GCM encryption key
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

/// Encrypt with AES-256-GCM
///
/// Returns the random nonce and the ciphertext with its tag appended.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> Result<(Nonce, Vec<u8>)> {
    let nonce = Nonce::random();
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;

    let ciphertext = cipher
        .encrypt(
            AesNonce::from_slice(&nonce.0),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| Error::EncryptionFailed(format!("Encryption failed: {}", e)))?;

    Ok((nonce, ciphertext))
}

/// Decrypt with AES-256-GCM
///
/// Fails with `DecryptionError` on a wrong key, nonce or AAD and on any
/// tampering.
pub fn decrypt(
    key: &EncryptionKey,
    nonce: &Nonce,
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::DecryptionError(format!("Invalid key: {}", e)))?;

    cipher
        .decrypt(
            AesNonce::from_slice(&nonce.0),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| Error::DecryptionError("authentication tag mismatch".into()))
}

/// HKDF salt binding the key to the unordered pair of public keys
fn pair_salt(a: &[u8; 32], b: &[u8; 32]) -> [u8; 64] {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(first);
    salt[32..].copy_from_slice(second);
    salt
}

fn packet_key(ours: &KeyPair, their_public: &[u8; 32]) -> Result<EncryptionKey> {
    let shared = SharedSecret::from_bytes(ours.diffie_hellman(their_public));
    shared.derive_key(&pair_salt(&ours.public_bytes(), their_public))
}

/// Encrypt `plaintext` for the holder of `their_public_key`
///
/// Returns base64 of `nonce || ciphertext || tag`.
pub fn seal(ours: &KeyPair, their_public_key: &str, plaintext: &[u8]) -> Result<String> {
    let their_public = decode_public_key(their_public_key)?;
    let key = packet_key(ours, &their_public)?;
    let (nonce, ciphertext) = encrypt(&key, plaintext, &[])?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(nonce.as_bytes());
    sealed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(sealed))
}

/// Decrypt content sealed between `ours` and `their_public_key`
pub fn open(ours: &KeyPair, their_public_key: &str, sealed: &str) -> Result<Vec<u8>> {
    let their_public = decode_public_key(their_public_key)?;
    let raw = BASE64
        .decode(sealed.trim())
        .map_err(|e| Error::DecryptionError(format!("content is not base64: {}", e)))?;

    if raw.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptionError("content too short".into()));
    }

    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);

    let key = packet_key(ours, &their_public)?;
    decrypt(&key, &Nonce::from_bytes(nonce), ciphertext, &[])
}

// ============================================================================
// TESTS
// ============================================================================
