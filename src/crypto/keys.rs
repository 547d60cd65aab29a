//! # Identity Keys
//!
//! The identity key pair is a single X25519 key pair. Both halves travel
//! and persist as standard base64 (44 characters for 32 bytes):
//!
//! ```text
//! {"privateKey": "<44 chars>", "publicKey": "<44 chars>"}
//! ```
//!
//! A `KeyPair` is immutable. Replacing the active identity means swapping
//! the whole `Arc<KeyPair>`, never editing one half.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::kdf::compute_key_fingerprint;
use super::KEY_SIZE;
use crate::error::{Error, Result};

/// Length of a base64-encoded 32-byte key
pub const ENCODED_KEY_LEN: usize = 44;

/// X25519 identity key pair
#[derive(Clone, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(try_from = "StoredKeyPair", into = "StoredKeyPair")]
pub struct KeyPair {
    #[zeroize(skip)] // x25519_dalek zeroizes its own secret
    secret: StaticSecret,
    #[zeroize(skip)]
    public: X25519PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a key pair from its base64 private key
    ///
    /// The private key must be exactly 44 base64 characters decoding to 32
    /// bytes. When `expected_public` is given, the derived public key has to
    /// match it.
    pub fn from_encoded(private_key: &str, expected_public: Option<&str>) -> Result<Self> {
        if private_key.len() != ENCODED_KEY_LEN {
            return Err(Error::InvalidKey(format!(
                "private key must be {} characters, got {}",
                ENCODED_KEY_LEN,
                private_key.len()
            )));
        }

        let decoded = Zeroizing::new(
            BASE64
                .decode(private_key)
                .map_err(|e| Error::InvalidKey(format!("private key is not base64: {}", e)))?,
        );
        let bytes: [u8; KEY_SIZE] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidKey("private key must decode to 32 bytes".into()))?;

        let secret = StaticSecret::from(bytes);
        let public = X25519PublicKey::from(&secret);
        let pair = Self { secret, public };

        if let Some(expected) = expected_public {
            if !pair.matches_public_key(expected) {
                return Err(Error::InvalidKey(
                    "private key does not belong to the published public key".into(),
                ));
            }
        }

        Ok(pair)
    }

    /// Base64 public key
    pub fn public_key(&self) -> String {
        BASE64.encode(self.public.as_bytes())
    }

    /// Raw public key bytes
    pub fn public_bytes(&self) -> [u8; KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Base64 private key
    ///
    /// Only for local persistence and escrow encryption. Never log or
    /// transmit the result.
    pub fn encoded_private_key(&self) -> Zeroizing<String> {
        let mut bytes = self.secret.to_bytes();
        let encoded = Zeroizing::new(BASE64.encode(bytes));
        bytes.zeroize();
        encoded
    }

    /// Short fingerprint of the public key, safe to log
    pub fn fingerprint(&self) -> String {
        compute_key_fingerprint(self.public.as_bytes())
    }

    /// Whether `public_key` (base64) is this pair's public key
    pub fn matches_public_key(&self, public_key: &str) -> bool {
        decode_public_key(public_key)
            .map(|bytes| bytes == self.public.to_bytes())
            .unwrap_or(false)
    }

    /// X25519 Diffie-Hellman with a peer's public key
    pub fn diffie_hellman(&self, their_public: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
        let their_public = X25519PublicKey::from(*their_public);
        self.secret.diffie_hellman(&their_public).to_bytes()
    }
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public.as_bytes() == other.public.as_bytes()
    }
}

impl Eq for KeyPair {}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("fingerprint", &self.fingerprint())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Decode a base64 X25519 public key
pub fn decode_public_key(public_key: &str) -> Result<[u8; KEY_SIZE]> {
    let bytes = BASE64
        .decode(public_key.trim())
        .map_err(|e| Error::InvalidKey(format!("public key is not base64: {}", e)))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidKey("public key must decode to 32 bytes".into()))
}

// ============================================================================
// PERSISTED FORM
// ============================================================================

/// JSON shape stored under `keyPair`
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct StoredKeyPair {
    private_key: String,
    public_key: String,
}

impl TryFrom<StoredKeyPair> for KeyPair {
    type Error = Error;

    fn try_from(stored: StoredKeyPair) -> Result<Self> {
        KeyPair::from_encoded(&stored.private_key, Some(&stored.public_key))
    }
}

impl From<KeyPair> for StoredKeyPair {
    fn from(pair: KeyPair) -> Self {
        Self {
            private_key: pair.encoded_private_key().to_string(),
            public_key: pair.public_key(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_encodes_to_44_chars() {
        let pair = KeyPair::generate();
        assert_eq!(pair.public_key().len(), ENCODED_KEY_LEN);
        assert_eq!(pair.encoded_private_key().len(), ENCODED_KEY_LEN);
    }

    #[test]
    fn test_from_encoded_roundtrip() {
        let pair = KeyPair::generate();
        let private_key = pair.encoded_private_key();

        let restored = KeyPair::from_encoded(&private_key, Some(&pair.public_key())).unwrap();
        assert_eq!(restored, pair);
        assert_eq!(restored.public_key(), pair.public_key());
    }

    #[test]
    fn test_from_encoded_rejects_wrong_length() {
        let err = KeyPair::from_encoded("c2hvcnQ=", None).unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
    }

    #[test]
    fn test_from_encoded_rejects_foreign_public_key() {
        let pair = KeyPair::generate();
        let other = KeyPair::generate();

        let result = KeyPair::from_encoded(&pair.encoded_private_key(), Some(&other.public_key()));
        assert!(result.is_err());
    }

    #[test]
    fn test_diffie_hellman_agreement() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        assert_eq!(
            alice.diffie_hellman(&bob.public_bytes()),
            bob.diffie_hellman(&alice.public_bytes())
        );
    }

    #[test]
    fn test_json_shape() {
        let pair = KeyPair::generate();
        let json = serde_json::to_value(&pair).unwrap();

        assert_eq!(json["publicKey"], pair.public_key());
        assert_eq!(json["privateKey"].as_str().unwrap().len(), ENCODED_KEY_LEN);

        let restored: KeyPair = serde_json::from_value(json).unwrap();
        assert_eq!(restored, pair);
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let pair = KeyPair::generate();
        let debug = format!("{:?}", pair);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(pair.encoded_private_key().as_str()));
    }
}
