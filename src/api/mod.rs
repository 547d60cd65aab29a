//! # Profile API
//!
//! Seam over the node's authenticated HTTP endpoints.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    HTTP COLLABORATOR                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  POST   /profile                   → own profile or null               │
//! │  GET    /profile/key               → EscrowPayload                     │
//! │  POST   /profile/key               ← EscrowPayload                     │
//! │  POST   /api/user/{id}/profile     → PeerProfile                       │
//! │  POST   /profile/contacts          → [userId]                          │
//! │  POST   /profile/addcontact        ← {contactId}                       │
//! │  POST   /profile/removecontact     ← {contactId}                       │
//! │  DELETE /profile/logout                                                │
//! │                                                                         │
//! │  Authentication is the node's session cookie.                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod http;

pub use http::HttpProfileApi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::escrow::EscrowPayload;
use crate::peers::PeerProfile;
use crate::storage::{keys, KeyValueStore};

/// The logged-in user's own profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnProfile {
    /// User id, used to tell sent from received packets
    pub id: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Whether the profile is hidden from search
    #[serde(default, rename = "private")]
    pub private_profile: bool,
}

impl OwnProfile {
    /// Cache the profile under `profile`
    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        store.set(keys::PROFILE, &serde_json::to_string(self)?).await
    }

    /// Profile cached by [`save`](Self::save), if any
    pub async fn load(store: &dyn KeyValueStore) -> Result<Option<Self>> {
        let Some(raw) = store.get(keys::PROFILE).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map_err(|e| Error::StorageReadError(format!("Cached profile is invalid: {}", e)))
    }

    /// Remove the cached profile
    pub async fn forget(store: &dyn KeyValueStore) -> Result<bool> {
        store.delete(keys::PROFILE).await
    }
}

/// Authenticated profile, key and contact endpoints
///
/// Transport failures surface as `ConnectivityError`.
#[async_trait]
pub trait ProfileApi: Send + Sync {
    /// Own profile; `None` when the session is not logged in
    async fn fetch_profile(&self) -> Result<Option<OwnProfile>>;

    /// Server-held escrow record
    async fn fetch_escrow(&self) -> Result<EscrowPayload>;

    /// Publish an escrow record (public key only or complete backup)
    async fn publish_escrow(&self, payload: &EscrowPayload) -> Result<()>;

    /// Public profile of another user
    async fn fetch_user_profile(&self, user_id: &str) -> Result<PeerProfile>;

    /// Contact id list
    async fn fetch_contacts(&self) -> Result<Vec<String>>;

    /// Add a contact
    async fn add_contact(&self, contact_id: &str) -> Result<()>;

    /// Remove a contact
    async fn remove_contact(&self, contact_id: &str) -> Result<()>;

    /// End the server session
    async fn logout(&self) -> Result<()>;
}
