//! Active session handle.
//!
//! Holds the active key pair and the logged-in user id. The key pair cell
//! has a single writer (the reconciler) and many readers (the codec).
//! Replacement swaps the whole `Arc<KeyPair>`, so a reader holding the old
//! `Arc` keeps a complete pair until it is done.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::crypto::KeyPair;
use crate::error::{Error, Result};

/// Explicit session state shared between the reconciler and the codec
#[derive(Default)]
pub struct ActiveSession {
    key_pair: RwLock<Option<Arc<KeyPair>>>,
    user_id: RwLock<Option<String>>,
}

impl ActiveSession {
    /// Session with no key and no user
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the active key pair
    pub fn key_pair(&self) -> Option<Arc<KeyPair>> {
        self.key_pair.read().clone()
    }

    /// Active key pair or `NoActiveKey`
    pub fn require_key_pair(&self) -> Result<Arc<KeyPair>> {
        self.key_pair().ok_or(Error::NoActiveKey)
    }

    /// Whether a key pair is active
    pub fn is_active(&self) -> bool {
        self.key_pair.read().is_some()
    }

    /// Logged-in user id
    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    /// Logged-in user id or `NoProfile`
    pub fn require_user_id(&self) -> Result<String> {
        self.user_id().ok_or(Error::NoProfile)
    }

    /// Install a key pair, returning the one it replaced
    pub(crate) fn activate(&self, key_pair: Arc<KeyPair>) -> Option<Arc<KeyPair>> {
        tracing::info!("Activated key pair {}", key_pair.fingerprint());
        self.key_pair.write().replace(key_pair)
    }

    /// Remove the active key pair
    pub(crate) fn deactivate(&self) -> Option<Arc<KeyPair>> {
        self.key_pair.write().take()
    }

    pub(crate) fn set_user_id(&self, user_id: Option<String>) {
        *self.user_id.write() = user_id;
    }
}
