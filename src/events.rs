//! # Core Events
//!
//! Notifications for the embedding application, fanned out over a tokio
//! broadcast channel. A lagging subscriber loses the oldest events; state
//! can always be re-read from the reconciler.

use tokio::sync::broadcast;

use crate::identity::ReconciliationState;
use crate::messaging::Packet;

/// Capacity of the event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the core
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// Reconciliation settled in a new state
    StateChanged {
        /// The new state
        state: ReconciliationState,
    },

    /// Effective connectivity changed (including reverts after a failed
    /// escrow fetch)
    ConnectivityChanged {
        /// Whether the node is considered reachable
        connected: bool,
    },

    /// The node has no profile for this session; the user must log in
    ProfileMissing,

    /// The escrow looks downgraded or incomplete, or the identity has no
    /// backup yet
    SecurityWarning {
        /// Human-readable reason
        reason: String,
    },

    /// Local and escrowed public keys differ
    KeyConflict {
        /// Fingerprint of the local public key
        local_fingerprint: String,
        /// Fingerprint of the escrowed public key
        remote_fingerprint: String,
    },

    /// An escrow record is waiting for its password
    PasswordRequired,

    /// The active identity has no cloud backup
    BackupDesired,

    /// A complete escrow record was published
    BackupStored,

    /// The local key pair was removed
    KeyRemoved,

    /// A new packet was stored
    PacketStored {
        /// The decrypted packet
        packet: Packet,
    },

    /// A packet could not be decrypted and was not stored
    PacketDropped {
        /// Id of the dropped packet
        packet_id: String,
        /// Why it was dropped
        reason: String,
    },

    /// The server reported a new packet range
    RangeUpdated {
        /// Number of packets visible to this identity
        range: u64,
    },

    /// A history sync cycle was aborted
    SyncFailed {
        /// Error description
        reason: String,
    },
}

impl CoreEvent {
    /// Check if this event needs the user's attention
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Self::ProfileMissing
                | Self::SecurityWarning { .. }
                | Self::KeyConflict { .. }
                | Self::PasswordRequired
                | Self::BackupDesired
        )
    }

    /// Check if this is a packet-related event
    pub fn is_packet_event(&self) -> bool {
        matches!(
            self,
            Self::PacketStored { .. }
                | Self::PacketDropped { .. }
                | Self::RangeUpdated { .. }
                | Self::SyncFailed { .. }
        )
    }
}

/// Cloneable sender side of the event channel
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; having no subscribers is fine
    pub fn emit(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_classification() {
        assert!(CoreEvent::PasswordRequired.requires_user_action());
        assert!(CoreEvent::KeyConflict {
            local_fingerprint: "a".into(),
            remote_fingerprint: "b".into(),
        }
        .requires_user_action());
        assert!(!CoreEvent::BackupStored.requires_user_action());

        assert!(CoreEvent::RangeUpdated { range: 3 }.is_packet_event());
        assert!(!CoreEvent::ProfileMissing.is_packet_event());
    }

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        // No subscriber yet; must not fail
        bus.emit(CoreEvent::BackupStored);

        let mut rx = bus.subscribe();
        bus.emit(CoreEvent::RangeUpdated { range: 7 });
        assert_eq!(rx.recv().await.unwrap(), CoreEvent::RangeUpdated { range: 7 });
    }
}
