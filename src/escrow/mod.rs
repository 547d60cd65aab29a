//! # Key Escrow
//!
//! Password-protected cloud backup of the identity private key.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ESCROW RECORD                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  password ──┐                                                          │
//! │             ├─► PBKDF2-HMAC-SHA256 (120,000 rounds) ─► 32-byte key     │
//! │  salt[128] ─┘                                   │                      │
//! │                                                 ▼                      │
//! │  privateKey (44 base64 chars) ──► AES-256-CBC / PKCS#7 (iv[16])        │
//! │                                                 │                      │
//! │                                                 ▼                      │
//! │  GET/POST /profile/key                                                 │
//! │  { "iv": b64, "salt": b64, "privateKey": b64(ct), "publicKey": b64 }   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The wire record is classified into [`EscrowPayload`] once, when it is
//! deserialized. Every other code path matches on the variant.
//!
//! A `Complete` record never holds a plaintext private key, and the raw
//! private key is never transmitted.

mod strength;

pub use strength::{ensure_escrow_allowed, evaluate, evaluate_async, PasswordReport, PasswordStrength};

use std::sync::Arc;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{derive_password_key, KeyPair, ENCODED_KEY_LEN};
use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Salt length for new escrow records
pub const SALT_SIZE: usize = 128;

/// IV length (one AES block)
pub const IV_SIZE: usize = 16;

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Server-held escrow record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<RawEscrowRecord>", into = "RawEscrowRecord")]
pub enum EscrowPayload {
    /// Nothing stored
    Empty,
    /// Only a public key was published; no backup exists
    PublicKeyOnly(String),
    /// Full password-encrypted backup
    Complete(EscrowRecord),
}

impl EscrowPayload {
    /// Published public key, if any
    pub fn public_key(&self) -> Option<&str> {
        match self {
            EscrowPayload::Empty => None,
            EscrowPayload::PublicKeyOnly(public_key) => Some(public_key),
            EscrowPayload::Complete(record) => Some(&record.public_key),
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            EscrowPayload::Empty => "empty",
            EscrowPayload::PublicKeyOnly(_) => "public-key-only",
            EscrowPayload::Complete(_) => "complete",
        }
    }
}

/// Complete escrow record, all fields base64
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowRecord {
    /// CBC initialization vector
    pub iv: String,
    /// PBKDF2 salt
    pub salt: String,
    /// Encrypted base64 private key
    pub encrypted_private_key: String,
    /// Public key of the escrowed pair
    pub public_key: String,
}

/// JSON shape of `/profile/key`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEscrowRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
}

fn present(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.is_empty())
}

impl From<Option<RawEscrowRecord>> for EscrowPayload {
    fn from(raw: Option<RawEscrowRecord>) -> Self {
        let Some(raw) = raw else {
            return EscrowPayload::Empty;
        };

        match (
            present(raw.iv),
            present(raw.salt),
            present(raw.private_key),
            present(raw.public_key),
        ) {
            (Some(iv), Some(salt), Some(encrypted_private_key), Some(public_key)) => {
                EscrowPayload::Complete(EscrowRecord {
                    iv,
                    salt,
                    encrypted_private_key,
                    public_key,
                })
            }
            (_, _, _, Some(public_key)) => EscrowPayload::PublicKeyOnly(public_key),
            _ => EscrowPayload::Empty,
        }
    }
}

impl From<EscrowPayload> for RawEscrowRecord {
    fn from(payload: EscrowPayload) -> Self {
        match payload {
            EscrowPayload::Empty => RawEscrowRecord::default(),
            EscrowPayload::PublicKeyOnly(public_key) => RawEscrowRecord {
                public_key: Some(public_key),
                ..RawEscrowRecord::default()
            },
            EscrowPayload::Complete(record) => RawEscrowRecord {
                iv: Some(record.iv),
                salt: Some(record.salt),
                private_key: Some(record.encrypted_private_key),
                public_key: Some(record.public_key),
            },
        }
    }
}

/// Output of [`escrow_encrypt`], all fields base64
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowCiphertext {
    /// CBC initialization vector
    pub iv: String,
    /// PBKDF2 salt
    pub salt: String,
    /// Encrypted private key
    pub ciphertext: String,
}

impl EscrowCiphertext {
    /// Attach the public key to form a publishable record
    pub fn into_record(self, public_key: String) -> EscrowRecord {
        EscrowRecord {
            iv: self.iv,
            salt: self.salt,
            encrypted_private_key: self.ciphertext,
            public_key,
        }
    }
}

// ============================================================================
// ENCRYPT / DECRYPT
// ============================================================================

/// Encrypt a base64 private key under `password`
///
/// Fresh salt and IV every call. CPU-bound; see [`seal_for_upload`].
pub fn escrow_encrypt(private_key: &str, password: &str) -> Result<EscrowCiphertext> {
    let mut salt = [0u8; SALT_SIZE];
    let mut iv = [0u8; IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let key = derive_password_key(password, &salt);
    let cipher = Aes256CbcEnc::new_from_slices(&key[..], &iv)
        .map_err(|e| Error::EncryptionFailed(format!("escrow cipher setup: {}", e)))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(private_key.as_bytes());

    Ok(EscrowCiphertext {
        iv: BASE64.encode(iv),
        salt: BASE64.encode(salt),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Recover the key pair from an escrow payload
///
/// Only a `Complete` payload can be decrypted. Any failure, including a
/// recovered key of the wrong size or one that does not derive the record's
/// public key, is a `DecryptionError`.
pub fn escrow_decrypt(payload: &EscrowPayload, password: &str) -> Result<KeyPair> {
    match payload {
        EscrowPayload::Complete(record) => decrypt_record(record, password),
        other => Err(Error::DecryptionError(format!(
            "escrow record is {}, nothing to decrypt",
            other.kind()
        ))),
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value.trim())
        .map_err(|e| Error::DecryptionError(format!("escrow {} is not base64: {}", name, e)))
}

fn decrypt_record(record: &EscrowRecord, password: &str) -> Result<KeyPair> {
    let iv = decode_field("iv", &record.iv)?;
    let salt = decode_field("salt", &record.salt)?;
    let ciphertext = decode_field("privateKey", &record.encrypted_private_key)?;

    // Older records carry a 32-byte IV; CBC only ever consumed its first block
    if iv.len() < IV_SIZE {
        return Err(Error::DecryptionError("escrow iv too short".into()));
    }
    if salt.is_empty() {
        return Err(Error::DecryptionError("escrow salt is empty".into()));
    }

    let key = derive_password_key(password, &salt);
    let cipher = Aes256CbcDec::new_from_slices(&key[..], &iv[..IV_SIZE])
        .map_err(|e| Error::DecryptionError(format!("escrow cipher setup: {}", e)))?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| Error::DecryptionError("wrong password or corrupted escrow".into()))?,
    );

    let private_key = std::str::from_utf8(&plaintext)
        .map_err(|_| Error::DecryptionError("wrong password or corrupted escrow".into()))?;
    if private_key.len() != ENCODED_KEY_LEN {
        return Err(Error::DecryptionError(format!(
            "recovered private key has {} characters, expected {}",
            private_key.len(),
            ENCODED_KEY_LEN
        )));
    }

    KeyPair::from_encoded(private_key, Some(&record.public_key))
        .map_err(|e| Error::DecryptionError(format!("recovered key rejected: {}", e)))
}

// ============================================================================
// WORKER-OFFLOADED ENTRY POINTS
// ============================================================================

/// Build a publishable escrow record for `key_pair`
///
/// Rejects passwords below the top two strength tiers before any
/// cryptographic work, then runs PBKDF2 on the blocking pool.
pub async fn seal_for_upload(key_pair: Arc<KeyPair>, password: String) -> Result<EscrowRecord> {
    let password = Zeroizing::new(password);
    ensure_escrow_allowed(&password).await?;

    tokio::task::spawn_blocking(move || {
        let private_key = key_pair.encoded_private_key();
        let sealed = escrow_encrypt(&private_key, &password)?;
        Ok::<_, Error>(sealed.into_record(key_pair.public_key()))
    })
    .await?
}

/// Decrypt an escrow record on the blocking pool
pub async fn unlock(record: EscrowRecord, password: String) -> Result<KeyPair> {
    let password = Zeroizing::new(password);
    tokio::task::spawn_blocking(move || decrypt_record(&record, &password)).await?
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG_PASSWORD: &str = "Tannenzapfen-Wolkenkratzer-1987!";

    fn complete_payload(pair: &KeyPair, password: &str) -> EscrowPayload {
        let sealed = escrow_encrypt(&pair.encoded_private_key(), password).unwrap();
        EscrowPayload::Complete(sealed.into_record(pair.public_key()))
    }

    #[test]
    fn test_classify_complete() {
        let json = r#"{"iv":"aXY=","salt":"c2FsdA==","privateKey":"Y3Q=","publicKey":"cGs="}"#;
        let payload: EscrowPayload = serde_json::from_str(json).unwrap();
        assert!(matches!(payload, EscrowPayload::Complete(_)));
        assert_eq!(payload.public_key(), Some("cGs="));
    }

    #[test]
    fn test_classify_public_key_only() {
        let payload: EscrowPayload = serde_json::from_str(r#"{"publicKey":"cGs="}"#).unwrap();
        assert_eq!(payload, EscrowPayload::PublicKeyOnly("cGs=".into()));

        // Partial escrow still only counts as a published public key
        let partial: EscrowPayload =
            serde_json::from_str(r#"{"iv":"aXY=","publicKey":"cGs=","privateKey":""}"#).unwrap();
        assert_eq!(partial, EscrowPayload::PublicKeyOnly("cGs=".into()));
    }

    #[test]
    fn test_classify_empty() {
        let from_null: EscrowPayload = serde_json::from_str("null").unwrap();
        let from_object: EscrowPayload = serde_json::from_str("{}").unwrap();
        let from_salt: EscrowPayload = serde_json::from_str(r#"{"salt":"c2FsdA=="}"#).unwrap();

        assert_eq!(from_null, EscrowPayload::Empty);
        assert_eq!(from_object, EscrowPayload::Empty);
        assert_eq!(from_salt, EscrowPayload::Empty);
    }

    #[test]
    fn test_serialize_shapes() {
        assert_eq!(serde_json::to_string(&EscrowPayload::Empty).unwrap(), "{}");
        assert_eq!(
            serde_json::to_string(&EscrowPayload::PublicKeyOnly("cGs=".into())).unwrap(),
            r#"{"publicKey":"cGs="}"#
        );
    }

    #[test]
    fn test_escrow_roundtrip() {
        let pair = KeyPair::generate();
        let payload = complete_payload(&pair, STRONG_PASSWORD);

        let recovered = escrow_decrypt(&payload, STRONG_PASSWORD).unwrap();
        assert_eq!(recovered, pair);
        assert_eq!(
            recovered.encoded_private_key().as_str(),
            pair.encoded_private_key().as_str()
        );
    }

    #[test]
    fn test_record_never_contains_plaintext_key() {
        let pair = KeyPair::generate();
        let EscrowPayload::Complete(record) = complete_payload(&pair, STRONG_PASSWORD) else {
            panic!("expected complete payload");
        };

        assert_ne!(record.encrypted_private_key, pair.encoded_private_key().as_str());
        assert_eq!(BASE64.decode(&record.salt).unwrap().len(), SALT_SIZE);
        assert_eq!(BASE64.decode(&record.iv).unwrap().len(), IV_SIZE);
    }

    #[test]
    fn test_wrong_password_fails() {
        let pair = KeyPair::generate();
        let payload = complete_payload(&pair, STRONG_PASSWORD);

        let result = escrow_decrypt(&payload, "not the password");
        assert!(matches!(result, Err(Error::DecryptionError(_))));
    }

    #[test]
    fn test_mismatched_public_key_fails() {
        let pair = KeyPair::generate();
        let other = KeyPair::generate();
        let sealed = escrow_encrypt(&pair.encoded_private_key(), STRONG_PASSWORD).unwrap();
        let payload = EscrowPayload::Complete(sealed.into_record(other.public_key()));

        let result = escrow_decrypt(&payload, STRONG_PASSWORD);
        assert!(matches!(result, Err(Error::DecryptionError(_))));
    }

    #[test]
    fn test_wrong_length_plaintext_fails() {
        let pair = KeyPair::generate();
        let sealed = escrow_encrypt("too-short", STRONG_PASSWORD).unwrap();
        let payload = EscrowPayload::Complete(sealed.into_record(pair.public_key()));

        let result = escrow_decrypt(&payload, STRONG_PASSWORD);
        assert!(matches!(result, Err(Error::DecryptionError(_))));
    }

    #[test]
    fn test_legacy_long_iv_uses_first_block() {
        let pair = KeyPair::generate();
        let sealed = escrow_encrypt(&pair.encoded_private_key(), STRONG_PASSWORD).unwrap();

        let mut long_iv = BASE64.decode(&sealed.iv).unwrap();
        long_iv.extend_from_slice(&[0xAB; 16]);
        let record = EscrowRecord {
            iv: BASE64.encode(long_iv),
            ..sealed.into_record(pair.public_key())
        };

        let recovered = escrow_decrypt(&EscrowPayload::Complete(record), STRONG_PASSWORD).unwrap();
        assert_eq!(recovered, pair);
    }

    #[test]
    fn test_non_complete_payload_fails() {
        assert!(matches!(
            escrow_decrypt(&EscrowPayload::Empty, STRONG_PASSWORD),
            Err(Error::DecryptionError(_))
        ));
        assert!(matches!(
            escrow_decrypt(&EscrowPayload::PublicKeyOnly("cGs=".into()), STRONG_PASSWORD),
            Err(Error::DecryptionError(_))
        ));
    }

    #[tokio::test]
    async fn test_seal_for_upload_rejects_weak_password() {
        let pair = Arc::new(KeyPair::generate());
        let result = seal_for_upload(pair, "password".into()).await;
        assert!(matches!(result, Err(Error::WeakPassword { .. })));
    }

    #[tokio::test]
    async fn test_seal_then_unlock() {
        let pair = Arc::new(KeyPair::generate());
        let record = seal_for_upload(pair.clone(), STRONG_PASSWORD.into())
            .await
            .unwrap();
        assert_eq!(record.public_key, pair.public_key());

        let recovered = unlock(record, STRONG_PASSWORD.into()).await.unwrap();
        assert_eq!(&recovered, pair.as_ref());
    }
}
