//! # Storage Module
//!
//! Local persistence seam for Wolke Core.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  KeyValueStore (platform secure storage, opaque to the core)           │
//! │  ─────────────────────────────────────────────────────────             │
//! │  keyPair    → {"privateKey": "...", "publicKey": "..."}                │
//! │  profile    → OwnProfile                                               │
//! │  packets    → { packetId: Packet, ... }                                │
//! │  userCache  → { userId: PeerProfile, ... }                             │
//! │  contacts   → [ userId, ... ]                                          │
//! │  users      → [ userId, ... ]                                          │
//! │  config     → {"useAllConnectionTypes": bool}                          │
//! │                                                                         │
//! │  PacketStore (in memory)                                               │
//! │  ───────────────────────                                               │
//! │  packetId → Packet. Re-delivery of a packetId is a no-op, which is     │
//! │  the only deduplication in the system.                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod packets;
mod secure_store;

pub use packets::PacketStore;
pub use secure_store::{delete_key_pair, load_key_pair, store_key_pair, SecureStore};

use async_trait::async_trait;

use crate::error::Result;

/// Key names used in the key-value store
pub mod keys {
    /// The local identity key pair
    pub const KEY_PAIR: &str = "keyPair";

    /// Own profile from the last connected pass
    pub const PROFILE: &str = "profile";

    /// Decrypted packets keyed by packet id
    pub const PACKETS: &str = "packets";

    /// Cached peer profiles keyed by user id
    pub const USER_CACHE: &str = "userCache";

    /// Contact id list
    pub const CONTACTS: &str = "contacts";

    /// Peers with at least one stored packet
    pub const USERS: &str = "users";

    /// Local preferences
    pub const CONFIG: &str = "config";
}

/// Opaque string key-value store backed by platform secure storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;
}
