//! # Messaging Module
//!
//! Per-peer encryption of chat content.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      PACKET FORMS                                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Outgoing (client → server, event "packet")                            │
//! │  { "receiver": userId, "content": seal({message, date}) }              │
//! │                                                                         │
//! │  Encrypted (server → client, push / history / ack)                     │
//! │  { "packetId": id, "sender": userId, "receiver": userId,               │
//! │    "content": base64 }                                                 │
//! │                                                                         │
//! │  Packet (decrypted, application-visible, immutable)                    │
//! │  { packetId, peerId, message, timestamp, direction }                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Decryption
//!
//! The "other party" of an encrypted packet is whichever of sender and
//! receiver is not the local user. Its public key comes from the
//! [`SessionCache`]. Content is opened with the active key pair, so both
//! received packets and our own sent packets decrypt.
//!
//! Failures are typed. Callers decide whether to drop and report.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::crypto::{open, seal};
use crate::error::{Error, Result};
use crate::identity::ActiveSession;
use crate::peers::SessionCache;

/// Whether a packet was sent or received by the local user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent by the local user
    Sent,
    /// Received from the peer
    Received,
}

/// A decrypted chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    /// Server-assigned unique id
    pub packet_id: String,
    /// The other party of the conversation
    pub peer_id: String,
    /// Message text
    pub message: String,
    /// Unix timestamp (milliseconds) taken by the sender
    pub timestamp: i64,
    /// Sent or received
    pub direction: Direction,
}

impl Packet {
    /// Whether the local user sent this packet
    pub fn is_sent(&self) -> bool {
        self.direction == Direction::Sent
    }
}

/// Wire form of a stored packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPacket {
    /// Server-assigned unique id
    #[serde(rename = "packetId", deserialize_with = "packet_id")]
    pub packet_id: String,
    /// Sender user id
    #[serde(rename = "sender")]
    pub sender_id: String,
    /// Receiver user id
    #[serde(rename = "receiver")]
    pub receiver_id: String,
    /// Sealed content
    #[serde(rename = "content")]
    pub ciphertext: String,
}

impl EncryptedPacket {
    /// The participant that is not `user_id`
    pub fn other_party(&self, user_id: &str) -> &str {
        if self.receiver_id != user_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// Packet ids arrive as strings or numbers depending on the node version
fn packet_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(id) => id,
        RawId::Number(id) => id.to_string(),
    })
}

/// Packet as emitted by the client, before the server assigns an id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingPacket {
    /// Receiver user id
    pub receiver: String,
    /// Sealed content
    pub content: String,
}

/// Plaintext inside the sealed content
#[derive(Serialize, Deserialize)]
struct PacketBody {
    message: String,
    date: i64,
}

/// Encrypts and decrypts chat content for the active session
pub struct MessageCodec {
    session: Arc<ActiveSession>,
    peers: Arc<SessionCache>,
}

impl MessageCodec {
    /// Create a codec over a session handle and peer cache
    pub fn new(session: Arc<ActiveSession>, peers: Arc<SessionCache>) -> Self {
        Self { session, peers }
    }

    /// Whether both a key pair and a user id are available
    pub fn is_ready(&self) -> bool {
        self.session.is_active() && self.session.user_id().is_some()
    }

    /// Whether `peer_id` has a username, fetching the profile on a miss
    pub async fn accessible(&self, peer_id: &str) -> bool {
        match self.peers.resolve(peer_id).await {
            Ok(profile) => profile.is_accessible(),
            Err(e) => {
                tracing::debug!("Could not resolve {}: {}", peer_id, e);
                false
            }
        }
    }

    async fn recipient_key(&self, peer_id: &str) -> Result<String> {
        let profile = self.peers.resolve(peer_id).await.map_err(|e| {
            Error::RecipientUnreachable(format!("{}: profile lookup failed: {}", peer_id, e))
        })?;

        if !profile.is_accessible() {
            return Err(Error::RecipientUnreachable(format!(
                "{} is not a chat user",
                peer_id
            )));
        }
        profile
            .public_key
            .ok_or_else(|| Error::RecipientUnreachable(format!("{} has no public key", peer_id)))
    }

    /// Encrypt `message` for `peer_id`, stamped with the current time
    pub async fn encrypt(&self, message: &str, peer_id: &str) -> Result<OutgoingPacket> {
        self.encrypt_at(message, peer_id, crate::time::now_timestamp_millis())
            .await
    }

    /// Encrypt `message` for `peer_id` with an explicit timestamp
    ///
    /// The recipient is checked before any cryptographic work.
    pub async fn encrypt_at(
        &self,
        message: &str,
        peer_id: &str,
        timestamp: i64,
    ) -> Result<OutgoingPacket> {
        let public_key = self.recipient_key(peer_id).await?;
        let key_pair = self.session.require_key_pair()?;

        let body = serde_json::to_vec(&PacketBody {
            message: message.to_string(),
            date: timestamp,
        })?;
        let content = seal(&key_pair, &public_key, &body)?;

        Ok(OutgoingPacket {
            receiver: peer_id.to_string(),
            content,
        })
    }

    /// Decrypt a wire packet
    pub async fn decrypt(&self, packet: &EncryptedPacket) -> Result<Packet> {
        let user_id = self.session.require_user_id()?;
        let key_pair = self.session.require_key_pair()?;

        let other = packet.other_party(&user_id).to_string();
        let profile = self.peers.resolve(&other).await?;
        let public_key = profile.public_key.ok_or_else(|| {
            Error::DecryptionError(format!("no public key known for {}", other))
        })?;

        let plaintext = open(&key_pair, &public_key, &packet.ciphertext)?;
        let body: PacketBody = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::MalformedPacket(format!("{}: {}", packet.packet_id, e)))?;

        let direction = if packet.sender_id == user_id {
            Direction::Sent
        } else {
            Direction::Received
        };

        Ok(Packet {
            packet_id: packet.packet_id.clone(),
            peer_id: other,
            message: body.message,
            timestamp: body.date,
            direction,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::test_support::{peer, MockApi};

    struct Party {
        codec: MessageCodec,
        key_pair: Arc<KeyPair>,
    }

    fn party(user_id: &str, api: Arc<MockApi>) -> Party {
        let session = Arc::new(ActiveSession::new());
        let key_pair = Arc::new(KeyPair::generate());
        session.activate(key_pair.clone());
        session.set_user_id(Some(user_id.to_string()));
        let peers = Arc::new(SessionCache::new(api));
        Party {
            codec: MessageCodec::new(session, peers),
            key_pair,
        }
    }

    fn stored(id: &str, sender: &str, outgoing: OutgoingPacket) -> EncryptedPacket {
        EncryptedPacket {
            packet_id: id.into(),
            sender_id: sender.into(),
            receiver_id: outgoing.receiver,
            ciphertext: outgoing.content,
        }
    }

    fn pair() -> (Party, Party) {
        let api = Arc::new(MockApi::new());
        let alice = party("alice", api.clone());
        let bob = party("bob", api.clone());
        api.add_user(peer("alice", Some("Alice"), Some(&alice.key_pair.public_key())));
        api.add_user(peer("bob", Some("Bob"), Some(&bob.key_pair.public_key())));
        (alice, bob)
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_message_and_timestamp() {
        let (alice, bob) = pair();

        let outgoing = alice.codec.encrypt_at("Servus!", "bob", 1_700_000_000_123).await.unwrap();
        assert_eq!(outgoing.receiver, "bob");
        let wire = stored("p1", "alice", outgoing);

        let received = bob.codec.decrypt(&wire).await.unwrap();
        assert_eq!(received.message, "Servus!");
        assert_eq!(received.timestamp, 1_700_000_000_123);
        assert_eq!(received.peer_id, "alice");
        assert_eq!(received.direction, Direction::Received);

        // The sender reads its own ack back
        let echoed = alice.codec.decrypt(&wire).await.unwrap();
        assert_eq!(echoed.message, "Servus!");
        assert_eq!(echoed.peer_id, "bob");
        assert!(echoed.is_sent());
    }

    #[tokio::test]
    async fn test_encrypt_refuses_unreachable_recipients() {
        let api = Arc::new(MockApi::new());
        api.add_user(peer("nokey", Some("No Key"), None));
        api.add_user(peer("noname", None, Some(&KeyPair::generate().public_key())));
        let alice = party("alice", api);

        for target in ["nokey", "noname", "unknown"] {
            let result = alice.codec.encrypt("hi", target).await;
            assert!(
                matches!(result, Err(Error::RecipientUnreachable(_))),
                "{} should be unreachable",
                target
            );
        }
        assert!(!alice.codec.accessible("noname").await);
        assert!(!alice.codec.accessible("unknown").await);
        assert!(alice.codec.accessible("nokey").await);
    }

    #[tokio::test]
    async fn test_encrypt_without_active_key() {
        let api = Arc::new(MockApi::new());
        api.add_user(peer("bob", Some("Bob"), Some(&KeyPair::generate().public_key())));
        let codec = MessageCodec::new(
            Arc::new(ActiveSession::new()),
            Arc::new(SessionCache::new(api)),
        );

        let result = codec.encrypt("hi", "bob").await;
        assert!(matches!(result, Err(Error::NoActiveKey)));
    }

    #[tokio::test]
    async fn test_decrypt_failure_is_typed() {
        let (alice, bob) = pair();
        let mut wire = stored("p1", "alice", alice.codec.encrypt("hi", "bob").await.unwrap());
        wire.ciphertext = wire.ciphertext.chars().rev().collect();

        let result = bob.codec.decrypt(&wire).await;
        assert!(matches!(result, Err(Error::DecryptionError(_))));
    }

    #[test]
    fn test_wire_shape() {
        let json = r#"{"packetId":42,"sender":"alice","receiver":"bob","content":"Y3Q="}"#;
        let packet: EncryptedPacket = serde_json::from_str(json).unwrap();
        assert_eq!(packet.packet_id, "42");
        assert_eq!(packet.other_party("bob"), "alice");
        assert_eq!(packet.other_party("alice"), "bob");

        let outgoing = OutgoingPacket {
            receiver: "bob".into(),
            content: "Y3Q=".into(),
        };
        assert_eq!(
            serde_json::to_string(&outgoing).unwrap(),
            r#"{"receiver":"bob","content":"Y3Q="}"#
        );
    }
}
