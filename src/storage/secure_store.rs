//! # Secure Storage
//!
//! In-memory [`KeyValueStore`] and the helpers that persist the identity
//! key pair.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    KEY PAIR PERSISTENCE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  store_key_pair   KeyPair ──JSON──► set("keyPair", ...)                │
//! │  load_key_pair    get("keyPair") ──JSON──► validated KeyPair           │
//! │  delete_key_pair  delete("keyPair")     (logout, explicit removal)     │
//! │                                                                         │
//! │  The stored private key never leaves the device. Platforms back the    │
//! │  trait with Keychain / Keystore; SecureStore keeps it in memory.       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use zeroize::Zeroizing;

use super::{keys, KeyValueStore};
use crate::crypto::KeyPair;
use crate::error::{Error, Result};

/// In-memory key-value store
///
/// Used in tests and by hosts that provide no platform secure storage.
/// Values are zeroized when replaced or removed.
pub struct SecureStore {
    memory: RwLock<HashMap<String, Zeroizing<String>>>,
}

impl SecureStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
        }
    }

    /// Check if a key exists
    pub fn exists(&self, key: &str) -> bool {
        self.memory.read().contains_key(key)
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.memory.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.memory.read().is_empty()
    }
}

impl Default for SecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for SecureStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.memory.read().get(key).map(|v| v.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.memory
            .write()
            .insert(key.to_string(), Zeroizing::new(value.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.memory.write().remove(key).is_some())
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Persist the identity key pair under `keyPair`
pub async fn store_key_pair(store: &dyn KeyValueStore, key_pair: &KeyPair) -> Result<()> {
    let json = Zeroizing::new(
        serde_json::to_string(key_pair)
            .map_err(|e| Error::StorageWriteError(format!("Failed to encode key pair: {}", e)))?,
    );
    store.set(keys::KEY_PAIR, &json).await
}

/// Load the identity key pair, if one is stored
///
/// A stored pair that fails validation is an error, not `None`; callers
/// must not silently generate a replacement identity.
pub async fn load_key_pair(store: &dyn KeyValueStore) -> Result<Option<KeyPair>> {
    let Some(json) = store.get(keys::KEY_PAIR).await? else {
        return Ok(None);
    };
    let json = Zeroizing::new(json);

    // `null` is what the platform store hands back after a JSON round trip
    // of an absent pair
    if json.trim() == "null" {
        return Ok(None);
    }

    serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| Error::StorageReadError(format!("Stored key pair is invalid: {}", e)))
}

/// Remove the stored identity key pair
pub async fn delete_key_pair(store: &dyn KeyValueStore) -> Result<bool> {
    store.delete(keys::KEY_PAIR).await
}

// ============================================================================
// TESTS
// ============================================================================
