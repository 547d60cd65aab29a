//! Key reconciler.
//!
//! Owns the session handle and every subsystem that depends on it. Each
//! [`reconcile`](KeyReconciler::reconcile) call runs three phases:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      RECONCILIATION PASS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. Observe   (no side effects)                                         │
//! │     load keyPair ─► fetch profile ─► fetch escrow                       │
//! │                                                                         │
//! │  2. Decide    decide(input) ─► Plan { state, effects }                  │
//! │                                                                         │
//! │  3. Apply     (serialised; abandoned if a newer pass started)          │
//! │     refresh contacts ─► run effects ─► commit state ─► history sync    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! User-driven resolutions (unlock, accept remote key, delete local key,
//! upload backup, logout) take the same apply lock and advance the epoch,
//! so an in-flight pass never overwrites their outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex};

use super::decision::{decide, Effect, Plan, ReconciliationInput, ReconciliationState, RemoteEscrow};
use super::ActiveSession;
use crate::api::{OwnProfile, ProfileApi};
use crate::channel::{ChannelTransport, PacketChannel};
use crate::config::{CoreConfig, LocalPreferences, NetworkStatus};
use crate::crypto::{compute_key_fingerprint, decode_public_key, KeyPair};
use crate::error::{Error, Result};
use crate::escrow::{self, EscrowPayload, EscrowRecord};
use crate::events::{CoreEvent, EventBus};
use crate::messaging::{MessageCodec, Packet};
use crate::peers::SessionCache;
use crate::storage::{delete_key_pair, load_key_pair, store_key_pair, KeyValueStore, PacketStore};
use crate::sync::PacketSync;

/// Mutable reconciliation status
#[derive(Default)]
struct Status {
    state: ReconciliationState,
    connected: bool,
    profile: Option<OwnProfile>,
    /// Complete escrow kept for a later password or conflict resolution
    pending_escrow: Option<EscrowRecord>,
    backup_desired: bool,
}

/// What the observe phase saw
struct Observation {
    input: ReconciliationInput,
    local: Option<KeyPair>,
    profile: Option<OwnProfile>,
}

/// Fingerprint of a base64 public key, or a marker when it does not decode
fn fingerprint_of(public_key: &str) -> String {
    decode_public_key(public_key)
        .map(|bytes| compute_key_fingerprint(&bytes))
        .unwrap_or_else(|_| "invalid".to_string())
}

/// Top-level key lifecycle state machine
pub struct KeyReconciler {
    config: RwLock<CoreConfig>,
    api: Arc<dyn ProfileApi>,
    store: Arc<dyn KeyValueStore>,
    session: Arc<ActiveSession>,
    peers: Arc<SessionCache>,
    packets: Arc<PacketStore>,
    codec: Arc<MessageCodec>,
    channel: Arc<PacketChannel>,
    sync: Arc<PacketSync>,
    events: EventBus,
    status: RwLock<Status>,
    epoch: AtomicU64,
    apply_lock: Mutex<()>,
}

impl KeyReconciler {
    /// Wire the core together over its three seams
    pub fn new(
        config: CoreConfig,
        api: Arc<dyn ProfileApi>,
        transport: Arc<dyn ChannelTransport>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let events = EventBus::new();
        let session = Arc::new(ActiveSession::new());
        let peers = Arc::new(SessionCache::new(api.clone()));
        let packets = Arc::new(PacketStore::new());
        let codec = Arc::new(MessageCodec::new(session.clone(), peers.clone()));
        let channel = Arc::new(PacketChannel::new(transport, config.history_chunk_size));
        let sync = Arc::new(PacketSync::new(
            channel.clone(),
            codec.clone(),
            packets.clone(),
            events.clone(),
        ));

        Self {
            config: RwLock::new(config),
            api,
            store,
            session,
            peers,
            packets,
            codec,
            channel,
            sync,
            events,
            status: RwLock::new(Status::default()),
            epoch: AtomicU64::new(0),
            apply_lock: Mutex::new(()),
        }
    }

    // ========================================================================
    // RECONCILIATION
    // ========================================================================

    /// Run the decision table for the current network
    ///
    /// Safe to call on every connectivity change. When a newer call starts
    /// before this one applies, this one returns
    /// [`Error::ReconciliationSuperseded`] without side effects. A failing
    /// history sync is returned after the state has been committed.
    pub async fn reconcile(&self, network: NetworkStatus) -> Result<ReconciliationState> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let connected = network.is_usable(&self.config.read());
        tracing::debug!("Reconciliation pass {} (connected: {})", epoch, connected);

        let observation = self.observe(connected).await?;
        let plan = decide(&observation.input);
        tracing::debug!("Pass {} plan: {:?}", epoch, plan);

        let _guard = self.apply_lock.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::warn!("Reconciliation pass {} superseded", epoch);
            return Err(Error::ReconciliationSuperseded);
        }
        self.apply(plan, observation).await
    }

    async fn observe(&self, connected: bool) -> Result<Observation> {
        let local = load_key_pair(self.store.as_ref()).await?;
        let mut profile = None;
        let mut remote = RemoteEscrow::Unreachable;

        if connected {
            profile = match self.api.fetch_profile().await {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::warn!("Profile fetch failed: {}", e);
                    None
                }
            };

            if profile.is_some() {
                remote = match self.api.fetch_escrow().await {
                    Ok(payload) => {
                        tracing::debug!("Escrow is {}", payload.kind());
                        RemoteEscrow::Fetched(payload)
                    }
                    Err(e) => {
                        tracing::warn!("Escrow fetch failed: {}", e);
                        RemoteEscrow::Unreachable
                    }
                };
            }
        }

        Ok(Observation {
            input: ReconciliationInput {
                connected,
                profile_present: profile.is_some(),
                local_public_key: local.as_ref().map(KeyPair::public_key),
                remote,
            },
            local,
            profile,
        })
    }

    async fn apply(&self, plan: Plan, observation: Observation) -> Result<ReconciliationState> {
        let Observation {
            input,
            local,
            profile,
        } = observation;
        let remote_record = match input.remote {
            RemoteEscrow::Fetched(EscrowPayload::Complete(record)) => Some(record),
            _ => None,
        };
        let local = local.map(Arc::new);

        if input.connected {
            self.session
                .set_user_id(profile.as_ref().map(|p| p.id.clone()));
            self.status.write().profile = profile;
        }
        if input.connected && input.profile_present {
            if let Err(e) = self.peers.refresh_contacts().await {
                tracing::warn!("Contact refresh failed: {}", e);
            }
        }
        self.status.write().pending_escrow = None;
        self.set_connected(input.connected);

        let mut sync_requested = false;
        for effect in &plan.effects {
            match *effect {
                Effect::ActivateLocalKey => {
                    let key_pair = local
                        .clone()
                        .ok_or_else(|| Error::Internal("no local key to activate".into()))?;
                    self.session.activate(key_pair);
                }
                Effect::GenerateKeyPair => {
                    let key_pair = KeyPair::generate();
                    store_key_pair(self.store.as_ref(), &key_pair).await?;
                    tracing::info!("Generated identity key {}", key_pair.fingerprint());
                    self.session.activate(Arc::new(key_pair));
                }
                Effect::PublishPublicKey => {
                    let public_key = self.session.require_key_pair()?.public_key();
                    let payload = EscrowPayload::PublicKeyOnly(public_key);
                    if let Err(e) = self.api.publish_escrow(&payload).await {
                        tracing::warn!("Publishing public key failed: {}", e);
                    }
                }
                Effect::MarkBackupDesired => {
                    self.status.write().backup_desired = true;
                    self.events.emit(CoreEvent::BackupDesired);
                }
                Effect::RequestPassword => {
                    self.status.write().pending_escrow = remote_record.clone();
                    self.events.emit(CoreEvent::PasswordRequired);
                }
                Effect::Warn(warning) => {
                    tracing::warn!("Security warning: {}", warning.reason());
                    self.events.emit(CoreEvent::SecurityWarning {
                        reason: warning.reason().to_string(),
                    });
                }
                Effect::RaiseConflict => {
                    let local_fingerprint = local
                        .as_ref()
                        .map(|k| k.fingerprint())
                        .unwrap_or_default();
                    let remote_fingerprint = remote_record
                        .as_ref()
                        .map(|r| fingerprint_of(&r.public_key))
                        .unwrap_or_default();
                    tracing::warn!(
                        "Key conflict: local {} vs escrowed {}",
                        local_fingerprint,
                        remote_fingerprint
                    );
                    self.status.write().pending_escrow = remote_record.clone();
                    self.events.emit(CoreEvent::KeyConflict {
                        local_fingerprint,
                        remote_fingerprint,
                    });
                }
                Effect::RevertConnectivity => self.set_connected(false),
                Effect::ReportProfileMissing => self.events.emit(CoreEvent::ProfileMissing),
                Effect::SyncHistory => sync_requested = true,
            }
        }

        self.set_state(plan.state);

        if sync_requested {
            self.sync.start_push_listener();
            self.sync.sync_history().await?;
        } else {
            self.sync.stop_push_listener();
        }
        Ok(plan.state)
    }

    fn set_state(&self, state: ReconciliationState) {
        let previous = std::mem::replace(&mut self.status.write().state, state);
        if previous != state {
            tracing::info!("Key state: {} -> {}", previous, state);
        }
        self.events.emit(CoreEvent::StateChanged { state });
    }

    fn set_connected(&self, connected: bool) {
        let previous = std::mem::replace(&mut self.status.write().connected, connected);
        if previous != connected {
            tracing::info!("Connectivity: {}", if connected { "online" } else { "offline" });
            self.events.emit(CoreEvent::ConnectivityChanged { connected });
        }
    }

    // ========================================================================
    // USER-DRIVEN RESOLUTIONS
    // ========================================================================

    /// Decrypt the pending escrow with `password` and make it the identity
    ///
    /// A wrong password fails with `DecryptionError` and changes nothing.
    /// In the conflict state use [`accept_remote_key`](Self::accept_remote_key).
    pub async fn unlock_escrow(&self, password: &str) -> Result<()> {
        let record = self.pending_escrow().ok_or(Error::NoPendingEscrow)?;
        if self.state() == ReconciliationState::KeyConflict {
            return Err(self.conflict_error(&record));
        }
        self.install_escrowed_key(record, password).await
    }

    /// Resolve a key conflict by replacing the local key with the escrowed one
    pub async fn accept_remote_key(&self, password: &str) -> Result<()> {
        if self.state() != ReconciliationState::KeyConflict {
            return Err(Error::NoPendingEscrow);
        }
        let record = self.pending_escrow().ok_or(Error::NoPendingEscrow)?;
        tracing::info!(
            "Replacing local key with escrowed key {}",
            fingerprint_of(&record.public_key)
        );
        self.install_escrowed_key(record, password).await
    }

    async fn install_escrowed_key(&self, record: EscrowRecord, password: &str) -> Result<()> {
        let key_pair = escrow::unlock(record, password.to_string()).await?;

        {
            let _guard = self.apply_lock.lock().await;
            self.epoch.fetch_add(1, Ordering::SeqCst);

            store_key_pair(self.store.as_ref(), &key_pair).await?;
            self.session.activate(Arc::new(key_pair));
            {
                let mut status = self.status.write();
                status.pending_escrow = None;
                status.backup_desired = false;
            }
            self.set_state(ReconciliationState::EscrowSynced);
        }

        self.sync.start_push_listener();
        self.sync.sync_history().await?;
        Ok(())
    }

    /// Escrow the active private key under `password` and publish it
    ///
    /// Refused for passwords below the top two strength tiers and while
    /// keys are in conflict.
    pub async fn upload_backup(&self, password: &str) -> Result<()> {
        if let Some(record) = self.pending_escrow() {
            if self.state() == ReconciliationState::KeyConflict {
                return Err(self.conflict_error(&record));
            }
        }

        let key_pair = self.session.require_key_pair()?;
        let record = escrow::seal_for_upload(key_pair, password.to_string()).await?;

        let _guard = self.apply_lock.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);

        self.api
            .publish_escrow(&EscrowPayload::Complete(record))
            .await?;

        self.status.write().backup_desired = false;
        tracing::info!("Key backup stored");
        self.events.emit(CoreEvent::BackupStored);

        if matches!(
            self.state(),
            ReconciliationState::NoKeysAnywhere | ReconciliationState::EscrowCorruptDowngrade
        ) {
            self.set_state(ReconciliationState::EscrowSynced);
        }
        Ok(())
    }

    /// Remove the local key pair; the next pass re-derives the state
    pub async fn delete_local_key(&self) -> Result<()> {
        let _guard = self.apply_lock.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);

        delete_key_pair(self.store.as_ref()).await?;
        self.sync.stop_push_listener();
        self.session.deactivate();
        {
            let mut status = self.status.write();
            status.pending_escrow = None;
            status.backup_desired = false;
        }

        tracing::info!("Local key pair removed");
        self.events.emit(CoreEvent::KeyRemoved);
        self.set_state(ReconciliationState::Uninitialized);
        Ok(())
    }

    /// End the session and wipe every locally held identity and cache
    pub async fn logout(&self) -> Result<()> {
        if let Err(e) = self.api.logout().await {
            tracing::warn!("Server logout failed: {}", e);
        }

        {
            let _guard = self.apply_lock.lock().await;
            self.epoch.fetch_add(1, Ordering::SeqCst);

            self.sync.stop_push_listener();
            delete_key_pair(self.store.as_ref()).await?;
            SessionCache::forget(self.store.as_ref()).await?;
            PacketStore::forget(self.store.as_ref()).await?;
            OwnProfile::forget(self.store.as_ref()).await?;

            self.session.deactivate();
            self.session.set_user_id(None);
            self.peers.clear();
            self.packets.clear();
            {
                let mut status = self.status.write();
                status.profile = None;
                status.pending_escrow = None;
                status.backup_desired = false;
            }

            tracing::info!("Logged out");
            self.events.emit(CoreEvent::KeyRemoved);
            self.set_state(ReconciliationState::Uninitialized);
        }

        if let Err(e) = self.channel.reconnect().await {
            tracing::warn!("Channel reconnect after logout failed: {}", e);
        }
        Ok(())
    }

    fn conflict_error(&self, record: &EscrowRecord) -> Error {
        Error::KeyConflict {
            local: self
                .session
                .key_pair()
                .map(|k| k.fingerprint())
                .unwrap_or_default(),
            remote: fingerprint_of(&record.public_key),
        }
    }

    // ========================================================================
    // MESSAGING
    // ========================================================================

    /// Send a text message to `peer_id`
    pub async fn send_text(&self, message: &str, peer_id: &str) -> Result<Packet> {
        self.sync.send_text(message, peer_id).await
    }

    /// Add a contact
    pub async fn add_contact(&self, contact_id: &str) -> Result<()> {
        self.peers.add_contact(contact_id).await
    }

    /// Remove a contact
    pub async fn remove_contact(&self, contact_id: &str) -> Result<()> {
        self.peers.remove_contact(contact_id).await
    }

    // ========================================================================
    // PERSISTENCE & PREFERENCES
    // ========================================================================

    /// Write packet, profile and contact caches to the store
    pub async fn persist_caches(&self) -> Result<()> {
        if let Some(profile) = self.profile() {
            profile.save(self.store.as_ref()).await?;
        }
        self.packets.persist(self.store.as_ref()).await?;
        self.peers.persist(self.store.as_ref()).await
    }

    /// Restore caches written by [`persist_caches`](Self::persist_caches)
    ///
    /// A cached own profile fills in the user id until a connected pass
    /// fetches a fresh one, so an offline start can still message.
    pub async fn load_caches(&self) -> Result<()> {
        if let Some(cached) = OwnProfile::load(self.store.as_ref()).await? {
            let mut status = self.status.write();
            if status.profile.is_none() {
                self.session.set_user_id(Some(cached.id.clone()));
                status.profile = Some(cached);
            }
        }
        let restored = self.packets.load(self.store.as_ref()).await?;
        self.peers.load(self.store.as_ref()).await?;
        tracing::debug!("Restored {} cached packets", restored);
        Ok(())
    }

    /// Load persisted preferences and apply them
    pub async fn load_preferences(&self) -> LocalPreferences {
        let preferences = LocalPreferences::load(self.store.as_ref()).await;
        let config = self.config.read().clone().with_preferences(&preferences);
        *self.config.write() = config;
        preferences
    }

    /// Persist and apply the metered-connection preference
    ///
    /// Takes effect on the next [`reconcile`](Self::reconcile).
    pub async fn set_use_all_connection_types(&self, enabled: bool) -> Result<()> {
        let preferences = LocalPreferences {
            use_all_connection_types: enabled,
        };
        preferences.save(self.store.as_ref()).await?;
        self.config.write().use_all_connection_types = enabled;
        Ok(())
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Current state
    pub fn state(&self) -> ReconciliationState {
        self.status.read().state
    }

    /// Effective connectivity after the last pass
    pub fn is_connected(&self) -> bool {
        self.status.read().connected
    }

    /// Own profile from the last connected pass
    pub fn profile(&self) -> Option<OwnProfile> {
        self.status.read().profile.clone()
    }

    /// Whether the active identity lacks a cloud backup
    pub fn backup_desired(&self) -> bool {
        self.status.read().backup_desired
    }

    /// Escrow record awaiting a password or conflict resolution
    pub fn pending_escrow(&self) -> Option<EscrowRecord> {
        self.status.read().pending_escrow.clone()
    }

    /// Current configuration
    pub fn config(&self) -> CoreConfig {
        self.config.read().clone()
    }

    /// Subscribe to core events
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Session handle
    pub fn session(&self) -> &Arc<ActiveSession> {
        &self.session
    }

    /// Peer profile cache
    pub fn peers(&self) -> &Arc<SessionCache> {
        &self.peers
    }

    /// Decrypted packets
    pub fn packets(&self) -> &Arc<PacketStore> {
        &self.packets
    }

    /// Message codec bound to the session
    pub fn codec(&self) -> &Arc<MessageCodec> {
        &self.codec
    }

    /// Packet ingestion
    pub fn sync(&self) -> &Arc<PacketSync> {
        &self.sync
    }
}

// ============================================================================
// TESTS
// ============================================================================
