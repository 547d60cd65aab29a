//! Packet-id keyed store of decrypted packets.
//!
//! Push delivery, history fetches and send acknowledgments may hand over
//! the same packet any number of times and in any order. Keying by
//! `packetId` makes every insert idempotent.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{keys, KeyValueStore};
use crate::error::{Error, Result};
use crate::messaging::Packet;

#[derive(Default)]
struct Inner {
    packets: HashMap<String, Packet>,
    /// Peers with at least one packet, in first-seen order
    users: Vec<String>,
}

/// In-memory packet store
#[derive(Default)]
pub struct PacketStore {
    inner: RwLock<Inner>,
}

impl PacketStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a packet. Returns `false` if its id was already stored.
    pub fn insert(&self, packet: Packet) -> bool {
        let mut inner = self.inner.write();
        if inner.packets.contains_key(&packet.packet_id) {
            return false;
        }
        if !inner.users.iter().any(|u| u == &packet.peer_id) {
            inner.users.push(packet.peer_id.clone());
        }
        inner.packets.insert(packet.packet_id.clone(), packet);
        true
    }

    /// Look up a packet by id
    pub fn get(&self, packet_id: &str) -> Option<Packet> {
        self.inner.read().packets.get(packet_id).cloned()
    }

    /// Whether a packet id is stored
    pub fn contains(&self, packet_id: &str) -> bool {
        self.inner.read().packets.contains_key(packet_id)
    }

    /// Number of stored packets
    pub fn len(&self) -> usize {
        self.inner.read().packets.len()
    }

    /// Whether no packets are stored
    pub fn is_empty(&self) -> bool {
        self.inner.read().packets.is_empty()
    }

    /// Packets exchanged with `peer_id`, oldest first
    pub fn conversation(&self, peer_id: &str) -> Vec<Packet> {
        let mut packets: Vec<Packet> = self
            .inner
            .read()
            .packets
            .values()
            .filter(|p| p.peer_id == peer_id)
            .cloned()
            .collect();
        packets.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.packet_id.cmp(&b.packet_id))
        });
        packets
    }

    /// Peers with at least one packet, in first-seen order
    pub fn users(&self) -> Vec<String> {
        self.inner.read().users.clone()
    }

    /// Drop all packets
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.packets.clear();
        inner.users.clear();
    }

    /// Write packets to `packets` and the users list to `users`
    pub async fn persist(&self, store: &dyn KeyValueStore) -> Result<()> {
        let (packets, users) = {
            let inner = self.inner.read();
            (
                serde_json::to_string(&inner.packets)?,
                serde_json::to_string(&inner.users)?,
            )
        };
        store.set(keys::PACKETS, &packets).await?;
        store.set(keys::USERS, &users).await
    }

    /// Merge packets written by [`persist`](Self::persist)
    ///
    /// Returns how many packets were new.
    pub async fn load(&self, store: &dyn KeyValueStore) -> Result<usize> {
        let mut added = 0;

        if let Some(raw) = store.get(keys::USERS).await? {
            let users: Vec<String> =
                serde_json::from_str(&raw).map_err(|e| {
                    Error::StorageReadError(format!("Cached users are invalid: {}", e))
                })?;
            let mut inner = self.inner.write();
            for user in users {
                if !inner.users.contains(&user) {
                    inner.users.push(user);
                }
            }
        }

        if let Some(raw) = store.get(keys::PACKETS).await? {
            let packets: HashMap<String, Packet> =
                serde_json::from_str(&raw).map_err(|e| {
                    Error::StorageReadError(format!("Cached packets are invalid: {}", e))
                })?;
            for packet in packets.into_values() {
                if self.insert(packet) {
                    added += 1;
                }
            }
        }

        Ok(added)
    }

    /// Remove persisted packets and users
    pub async fn forget(store: &dyn KeyValueStore) -> Result<()> {
        store.delete(keys::PACKETS).await?;
        store.delete(keys::USERS).await?;
        Ok(())
    }
}
