//! # Peer Profiles
//!
//! In-session cache of other users' public profiles and public keys.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       SESSION CACHE                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  resolve(id) ──► cached? ──yes──► PeerProfile                          │
//! │                     │                                                   │
//! │                     no ──► POST /api/user/{id}/profile ──► cache ──►   │
//! │                                                                         │
//! │  refresh(id)          fetch and overwrite the whole entry              │
//! │  refresh_contacts()   fetch contact ids, resolve unknown ids           │
//! │                                                                         │
//! │  Entries are never evicted or expired within a session. A refresh      │
//! │  replaces an entry wholesale and leaves every other entry alone.       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::api::ProfileApi;
use crate::error::{Error, Result};
use crate::storage::{keys, KeyValueStore};

/// Public profile of another user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerProfile {
    /// User id
    pub id: String,
    /// Display name; absent for deleted or unknown users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Base64 X25519 public key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl PeerProfile {
    /// Whether packets may be sent to this user
    pub fn is_accessible(&self) -> bool {
        self.username.is_some()
    }

    /// Whether content can be encrypted for this user
    pub fn is_chat_capable(&self) -> bool {
        self.public_key.is_some()
    }
}

/// Lazily populated peer profile cache
pub struct SessionCache {
    api: Arc<dyn ProfileApi>,
    entries: RwLock<HashMap<String, PeerProfile>>,
    contacts: RwLock<Vec<String>>,
}

impl SessionCache {
    /// Create an empty cache backed by `api`
    pub fn new(api: Arc<dyn ProfileApi>) -> Self {
        Self {
            api,
            entries: RwLock::new(HashMap::new()),
            contacts: RwLock::new(Vec::new()),
        }
    }

    /// Cached entry, without fetching
    pub fn get(&self, user_id: &str) -> Option<PeerProfile> {
        self.entries.read().get(user_id).cloned()
    }

    /// Cached entry, or fetch and cache it
    pub async fn resolve(&self, user_id: &str) -> Result<PeerProfile> {
        if let Some(profile) = self.get(user_id) {
            return Ok(profile);
        }
        self.refresh(user_id).await
    }

    /// Fetch a profile and replace any cached entry with it
    pub async fn refresh(&self, user_id: &str) -> Result<PeerProfile> {
        let profile = self.api.fetch_user_profile(user_id).await?;
        tracing::debug!(
            "Cached profile for {} (accessible: {}, chat-capable: {})",
            user_id,
            profile.is_accessible(),
            profile.is_chat_capable()
        );
        self.insert(user_id.to_string(), profile.clone());
        Ok(profile)
    }

    /// Store an entry under `user_id`
    pub fn insert(&self, user_id: String, profile: PeerProfile) {
        self.entries.write().insert(user_id, profile);
    }

    /// Fetch the contact list and resolve every contact not yet cached
    ///
    /// Lookups run concurrently. A failed lookup is logged and skipped.
    pub async fn refresh_contacts(&self) -> Result<Vec<String>> {
        let contacts = self.api.fetch_contacts().await?;
        *self.contacts.write() = contacts.clone();

        let missing: Vec<&String> = contacts
            .iter()
            .filter(|id| self.get(id).is_none())
            .collect();

        let results = join_all(missing.iter().map(|id| self.refresh(id))).await;
        for (id, result) in missing.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("Failed to fetch contact profile {}: {}", id, e);
            }
        }

        Ok(contacts)
    }

    /// Current contact ids
    pub fn contacts(&self) -> Vec<String> {
        self.contacts.read().clone()
    }

    /// Add a contact on the server and locally
    pub async fn add_contact(&self, contact_id: &str) -> Result<()> {
        self.api.add_contact(contact_id).await?;
        {
            let mut contacts = self.contacts.write();
            if !contacts.iter().any(|c| c == contact_id) {
                contacts.push(contact_id.to_string());
            }
        }
        if self.get(contact_id).is_none() {
            if let Err(e) = self.refresh(contact_id).await {
                tracing::warn!("Failed to fetch contact profile {}: {}", contact_id, e);
            }
        }
        Ok(())
    }

    /// Remove a contact on the server and locally
    ///
    /// The cached profile stays; it may still be needed to decrypt history.
    pub async fn remove_contact(&self, contact_id: &str) -> Result<()> {
        self.api.remove_contact(contact_id).await?;
        self.contacts.write().retain(|c| c != contact_id);
        Ok(())
    }

    /// Number of cached profiles
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no profile is cached
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every cached profile and the contact list
    pub fn clear(&self) {
        self.entries.write().clear();
        self.contacts.write().clear();
    }

    /// Write profiles to `userCache` and the contact list to `contacts`
    pub async fn persist(&self, store: &dyn KeyValueStore) -> Result<()> {
        let entries = serde_json::to_string(&*self.entries.read())?;
        let contacts = serde_json::to_string(&*self.contacts.read())?;
        store.set(keys::USER_CACHE, &entries).await?;
        store.set(keys::CONTACTS, &contacts).await
    }

    /// Restore profiles and contacts written by [`persist`](Self::persist)
    ///
    /// Restored entries do not overwrite profiles fetched this session.
    pub async fn load(&self, store: &dyn KeyValueStore) -> Result<()> {
        if let Some(raw) = store.get(keys::USER_CACHE).await? {
            let restored: HashMap<String, PeerProfile> =
                serde_json::from_str(&raw).map_err(|e| {
                    Error::StorageReadError(format!("Cached profiles are invalid: {}", e))
                })?;
            let mut entries = self.entries.write();
            for (id, profile) in restored {
                entries.entry(id).or_insert(profile);
            }
        }
        if let Some(raw) = store.get(keys::CONTACTS).await? {
            let restored: Vec<String> =
                serde_json::from_str(&raw).map_err(|e| {
                    Error::StorageReadError(format!("Cached contacts are invalid: {}", e))
                })?;
            let mut contacts = self.contacts.write();
            if contacts.is_empty() {
                *contacts = restored;
            }
        }
        Ok(())
    }

    /// Remove persisted profiles and contacts
    pub async fn forget(store: &dyn KeyValueStore) -> Result<()> {
        store.delete(keys::USER_CACHE).await?;
        store.delete(keys::CONTACTS).await?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SecureStore;
    use crate::test_support::{peer, MockApi};

    #[tokio::test]
    async fn test_resolve_caches_on_miss() {
        let api = Arc::new(MockApi::new());
        api.add_user(peer("bob", Some("Bob"), Some("cGs=")));
        let cache = SessionCache::new(api.clone());

        let first = cache.resolve("bob").await.unwrap();
        let second = cache.resolve("bob").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(api.profile_fetches("bob"), 1);
    }

    #[tokio::test]
    async fn test_refresh_replaces_wholesale() {
        let api = Arc::new(MockApi::new());
        api.add_user(peer("bob", Some("Bob"), Some("cGs=")));
        let cache = SessionCache::new(api.clone());
        cache.resolve("bob").await.unwrap();

        // Server now reports no username and no key
        api.add_user(peer("bob", None, None));
        let refreshed = cache.refresh("bob").await.unwrap();

        assert!(!refreshed.is_accessible());
        assert!(!refreshed.is_chat_capable());
        assert_eq!(cache.get("bob").unwrap(), refreshed);
    }

    #[tokio::test]
    async fn test_refresh_contacts_keeps_other_entries() {
        let api = Arc::new(MockApi::new());
        api.add_user(peer("bob", Some("Bob"), Some("cGs=")));
        api.add_user(peer("carol", Some("Carol"), None));
        api.set_contacts(vec!["carol".into(), "ghost".into()]);
        let cache = SessionCache::new(api.clone());
        cache.insert("dave".into(), peer("dave", Some("Dave"), None));

        let contacts = cache.refresh_contacts().await.unwrap();

        assert_eq!(contacts, vec!["carol".to_string(), "ghost".to_string()]);
        assert!(cache.get("carol").is_some());
        // Unknown contact is logged and skipped
        assert!(cache.get("ghost").is_none());
        // Entries outside the refreshed set survive
        assert!(cache.get("dave").is_some());
        assert!(cache.get("bob").is_none());
    }

    #[tokio::test]
    async fn test_contact_operations() {
        let api = Arc::new(MockApi::new());
        api.add_user(peer("bob", Some("Bob"), Some("cGs=")));
        let cache = SessionCache::new(api.clone());

        cache.add_contact("bob").await.unwrap();
        assert_eq!(cache.contacts(), vec!["bob".to_string()]);
        assert!(cache.get("bob").is_some());

        cache.remove_contact("bob").await.unwrap();
        assert!(cache.contacts().is_empty());
        assert!(cache.get("bob").is_some());
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let api = Arc::new(MockApi::new());
        let store = SecureStore::new();

        let cache = SessionCache::new(api.clone());
        cache.insert("bob".into(), peer("bob", Some("Bob"), Some("cGs=")));
        cache.persist(&store).await.unwrap();

        let restored = SessionCache::new(api);
        restored.load(&store).await.unwrap();
        assert_eq!(restored.get("bob"), cache.get("bob"));

        SessionCache::forget(&store).await.unwrap();
        assert!(store.get(keys::USER_CACHE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_cache_is_a_read_error() {
        let store = SecureStore::new();
        store.set(keys::CONTACTS, "{\"bob\"").await.unwrap();

        let cache = SessionCache::new(Arc::new(MockApi::new()));
        assert!(matches!(
            cache.load(&store).await,
            Err(Error::StorageReadError(_))
        ));
    }
}
