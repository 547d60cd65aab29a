//! In-memory stand-ins for the node's HTTP API and chat channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, Notify};

use crate::api::{OwnProfile, ProfileApi};
use crate::channel::{
    ChannelTransport, HistoryQuery, ServerEvent, PACKETS_EVENT, PACKET_EVENT, RANGE_EVENT,
};
use crate::error::{Error, Result};
use crate::escrow::EscrowPayload;
use crate::messaging::{EncryptedPacket, OutgoingPacket};
use crate::peers::PeerProfile;

/// Build a peer profile
pub fn peer(id: &str, username: Option<&str>, public_key: Option<&str>) -> PeerProfile {
    PeerProfile {
        id: id.to_string(),
        username: username.map(str::to_string),
        public_key: public_key.map(str::to_string),
        avatar: None,
    }
}

// ============================================================================
// PROFILE API
// ============================================================================

pub struct MockApi {
    profile: Mutex<Option<OwnProfile>>,
    escrow: Mutex<EscrowPayload>,
    users: Mutex<HashMap<String, PeerProfile>>,
    contacts: Mutex<Vec<String>>,
    fetches: Mutex<HashMap<String, usize>>,
    published: Mutex<Vec<EscrowPayload>>,
    escrow_unreachable: AtomicBool,
    escrow_gate: Mutex<Option<EscrowGate>>,
    logged_out: AtomicBool,
}

/// Holds escrow fetches after they read the record
#[derive(Clone, Default)]
pub struct EscrowGate {
    /// Signalled once per fetch that has read the record
    pub parked: Arc<Notify>,
    /// Lets one parked fetch return
    pub release: Arc<Notify>,
}

impl MockApi {
    /// Logged out, no escrow, no users
    pub fn new() -> Self {
        Self {
            profile: Mutex::new(None),
            escrow: Mutex::new(EscrowPayload::Empty),
            users: Mutex::new(HashMap::new()),
            contacts: Mutex::new(Vec::new()),
            fetches: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            escrow_unreachable: AtomicBool::new(false),
            escrow_gate: Mutex::new(None),
            logged_out: AtomicBool::new(false),
        }
    }

    /// Logged in as `user_id`
    pub fn logged_in(user_id: &str) -> Self {
        let api = Self::new();
        api.login(user_id);
        api
    }

    pub fn login(&self, user_id: &str) {
        *self.profile.lock() = Some(OwnProfile {
            id: user_id.to_string(),
            username: Some(user_id.to_string()),
            avatar: None,
            private_profile: false,
        });
    }

    pub fn set_escrow(&self, payload: EscrowPayload) {
        *self.escrow.lock() = payload;
    }

    pub fn escrow(&self) -> EscrowPayload {
        self.escrow.lock().clone()
    }

    pub fn set_escrow_unreachable(&self, unreachable: bool) {
        self.escrow_unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Park every later escrow fetch until released
    pub fn gate_escrow_fetches(&self) -> EscrowGate {
        let gate = EscrowGate::default();
        *self.escrow_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn add_user(&self, profile: PeerProfile) {
        self.users.lock().insert(profile.id.clone(), profile);
    }

    pub fn set_contacts(&self, contacts: Vec<String>) {
        *self.contacts.lock() = contacts;
    }

    pub fn profile_fetches(&self, user_id: &str) -> usize {
        self.fetches.lock().get(user_id).copied().unwrap_or(0)
    }

    pub fn published(&self) -> Vec<EscrowPayload> {
        self.published.lock().clone()
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileApi for MockApi {
    async fn fetch_profile(&self) -> Result<Option<OwnProfile>> {
        Ok(self.profile.lock().clone())
    }

    async fn fetch_escrow(&self) -> Result<EscrowPayload> {
        if self.escrow_unreachable.load(Ordering::SeqCst) {
            return Err(Error::ConnectivityError("mock escrow endpoint down".into()));
        }
        let payload = self.escrow();
        let gate = self.escrow_gate.lock().clone();
        if let Some(gate) = gate {
            gate.parked.notify_one();
            gate.release.notified().await;
        }
        Ok(payload)
    }

    async fn publish_escrow(&self, payload: &EscrowPayload) -> Result<()> {
        self.published.lock().push(payload.clone());
        self.set_escrow(payload.clone());
        Ok(())
    }

    async fn fetch_user_profile(&self, user_id: &str) -> Result<PeerProfile> {
        *self.fetches.lock().entry(user_id.to_string()).or_insert(0) += 1;
        self.users
            .lock()
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::ConnectivityError(format!("no such user {}", user_id)))
    }

    async fn fetch_contacts(&self) -> Result<Vec<String>> {
        Ok(self.contacts.lock().clone())
    }

    async fn add_contact(&self, contact_id: &str) -> Result<()> {
        self.contacts.lock().push(contact_id.to_string());
        Ok(())
    }

    async fn remove_contact(&self, contact_id: &str) -> Result<()> {
        self.contacts.lock().retain(|c| c != contact_id);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.logged_out.store(true, Ordering::SeqCst);
        *self.profile.lock() = None;
        Ok(())
    }
}

// ============================================================================
// CHANNEL TRANSPORT
// ============================================================================

enum RangeReply {
    /// Number of stored packets
    Count,
    Fixed(u64),
    Undefined,
}

/// Scripted chat server holding packets for one user
pub struct MockTransport {
    user_id: String,
    range: Mutex<RangeReply>,
    stored: Mutex<Vec<EncryptedPacket>>,
    queries: Mutex<Vec<HistoryQuery>>,
    push_tx: broadcast::Sender<ServerEvent>,
    next_id: AtomicU64,
    unreachable: AtomicBool,
    reconnects: AtomicUsize,
}

impl MockTransport {
    pub fn new(user_id: &str) -> Self {
        let (push_tx, _) = broadcast::channel(64);
        Self {
            user_id: user_id.to_string(),
            range: Mutex::new(RangeReply::Count),
            stored: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            push_tx,
            next_id: AtomicU64::new(1000),
            unreachable: AtomicBool::new(false),
            reconnects: AtomicUsize::new(0),
        }
    }

    /// `None` makes the server acknowledge `range` with nothing
    pub fn set_range(&self, range: Option<u64>) {
        *self.range.lock() = match range {
            Some(n) => RangeReply::Fixed(n),
            None => RangeReply::Undefined,
        };
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Put a packet into server-side history
    pub fn store(&self, packet: EncryptedPacket) {
        self.stored.lock().push(packet);
    }

    pub fn stored(&self) -> Vec<EncryptedPacket> {
        self.stored.lock().clone()
    }

    pub fn history_queries(&self) -> Vec<HistoryQuery> {
        self.queries.lock().clone()
    }

    pub fn push(&self, packet: EncryptedPacket) {
        let payload = serde_json::to_value(packet).unwrap();
        self.push_event(PACKET_EVENT, payload);
    }

    pub fn push_event(&self, event: &str, payload: Value) {
        let _ = self.push_tx.send(ServerEvent {
            event: event.to_string(),
            payload,
        });
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelTransport for MockTransport {
    async fn emit(&self, event: &str, payload: Value) -> Result<Option<Value>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::ConnectivityError("mock channel down".into()));
        }

        match event {
            RANGE_EVENT => Ok(match *self.range.lock() {
                RangeReply::Count => Some(Value::from(self.stored.lock().len() as u64)),
                RangeReply::Fixed(n) => Some(Value::from(n)),
                RangeReply::Undefined => None,
            }),
            PACKETS_EVENT => {
                let query: HistoryQuery = serde_json::from_value(payload)?;
                self.queries.lock().push(query);
                let stored = self.stored.lock();
                let page: Vec<EncryptedPacket> = match query.range {
                    None => stored.clone(),
                    Some(range) => stored
                        .iter()
                        .skip(query.start.unwrap_or(0) as usize)
                        .take(range as usize)
                        .cloned()
                        .collect(),
                };
                Ok(Some(serde_json::to_value(page)?))
            }
            PACKET_EVENT => {
                let outgoing: OutgoingPacket = serde_json::from_value(payload)?;
                let packet = EncryptedPacket {
                    packet_id: self.next_id.fetch_add(1, Ordering::SeqCst).to_string(),
                    sender_id: self.user_id.clone(),
                    receiver_id: outgoing.receiver,
                    ciphertext: outgoing.content,
                };
                self.store(packet.clone());
                Ok(Some(serde_json::to_value(packet)?))
            }
            other => Err(Error::ProtocolError(format!("unknown event {}", other))),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.push_tx.subscribe()
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
