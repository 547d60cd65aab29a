//! # Packet Sync
//!
//! Moves packets from the channel through the codec into the store.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         INGESTION PATHS                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  push listener ─────┐                                                  │
//! │                     │                                                  │
//! │  history sync ──────┼──► ingest() ──► MessageCodec::decrypt ──┐        │
//! │                     │                                          │        │
//! │  send ack ──────────┘                                          ▼        │
//! │                                          PacketStore::insert (by id)   │
//! │                                                                         │
//! │  Paths interleave freely. The store is the only deduplication point.  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A packet that fails to decrypt is never discarded silently: it is logged
//! and reported as [`CoreEvent::PacketDropped`].

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::channel::PacketChannel;
use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventBus};
use crate::messaging::{EncryptedPacket, MessageCodec, Packet};
use crate::storage::PacketStore;

/// What happened to one incoming packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Decrypted and stored
    Stored,
    /// Already stored under the same id
    Duplicate,
    /// Could not be decrypted
    Dropped,
}

/// Tally of one history sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Range reported by the server
    pub range: u64,
    /// Newly stored packets
    pub stored: usize,
    /// Packets already known
    pub duplicates: usize,
    /// Packets that failed to decrypt
    pub dropped: usize,
}

impl SyncReport {
    fn record(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Stored => self.stored += 1,
            IngestOutcome::Duplicate => self.duplicates += 1,
            IngestOutcome::Dropped => self.dropped += 1,
        }
    }
}

/// Packet ingestion over a channel, codec and store
pub struct PacketSync {
    channel: Arc<PacketChannel>,
    codec: Arc<MessageCodec>,
    packets: Arc<PacketStore>,
    events: EventBus,
    range: RwLock<Option<u64>>,
    listener: RwLock<Option<JoinHandle<()>>>,
}

impl PacketSync {
    /// Create a sync engine
    pub fn new(
        channel: Arc<PacketChannel>,
        codec: Arc<MessageCodec>,
        packets: Arc<PacketStore>,
        events: EventBus,
    ) -> Self {
        Self {
            channel,
            codec,
            packets,
            events,
            range: RwLock::new(None),
            listener: RwLock::new(None),
        }
    }

    /// Decrypt and store one packet
    pub async fn ingest(&self, encrypted: &EncryptedPacket) -> IngestOutcome {
        if self.packets.contains(&encrypted.packet_id) {
            return IngestOutcome::Duplicate;
        }

        match self.codec.decrypt(encrypted).await {
            Ok(packet) => {
                // A concurrent path may have stored it while we decrypted
                if self.packets.insert(packet.clone()) {
                    self.events.emit(CoreEvent::PacketStored { packet });
                    IngestOutcome::Stored
                } else {
                    IngestOutcome::Duplicate
                }
            }
            Err(e) => {
                tracing::warn!("Dropping packet {}: {}", encrypted.packet_id, e);
                self.events.emit(CoreEvent::PacketDropped {
                    packet_id: encrypted.packet_id.clone(),
                    reason: e.to_string(),
                });
                IngestOutcome::Dropped
            }
        }
    }

    /// Last range reported by the server
    pub fn range(&self) -> Option<u64> {
        *self.range.read()
    }

    /// Query and remember the server's packet count
    pub async fn refresh_range(&self) -> Result<u64> {
        let range = self.channel.query_range().await?;
        *self.range.write() = Some(range);
        self.events.emit(CoreEvent::RangeUpdated { range });
        Ok(range)
    }

    /// Full history sync from scratch
    ///
    /// A protocol or transport failure aborts the cycle, is broadcast as
    /// [`CoreEvent::SyncFailed`] and is returned to the caller.
    pub async fn sync_history(&self) -> Result<SyncReport> {
        match self.run_history_sync().await {
            Ok(report) => {
                tracing::info!(
                    "History sync: range {}, {} stored, {} known, {} dropped",
                    report.range,
                    report.stored,
                    report.duplicates,
                    report.dropped
                );
                Ok(report)
            }
            Err(e) => {
                tracing::warn!("History sync aborted: {}", e);
                self.events.emit(CoreEvent::SyncFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_history_sync(&self) -> Result<SyncReport> {
        let range = self.refresh_range().await?;
        let mut report = SyncReport {
            range,
            ..Default::default()
        };

        for encrypted in self.channel.fetch_all(range).await? {
            report.record(self.ingest(&encrypted).await);
        }
        Ok(report)
    }

    /// Encrypt, send and store a text message
    ///
    /// The recipient is checked before any cryptographic work. The returned
    /// packet is the decrypted server acknowledgment.
    pub async fn send_text(&self, message: &str, peer_id: &str) -> Result<Packet> {
        if !self.codec.accessible(peer_id).await {
            return Err(Error::RecipientUnreachable(format!(
                "{} is not a chat user",
                peer_id
            )));
        }

        let outgoing = self.codec.encrypt(message, peer_id).await?;
        let ack = self.channel.send(&outgoing).await?;
        self.ingest(&ack).await;

        self.packets.get(&ack.packet_id).ok_or_else(|| {
            Error::DecryptionError(format!(
                "acknowledgment {} could not be decrypted",
                ack.packet_id
            ))
        })
    }

    /// Whether the push listener task is running
    pub fn is_listening(&self) -> bool {
        self.listener
            .read()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Start ingesting pushed packets; a no-op while already running
    ///
    /// Pushes arriving before a key and user id are active are skipped; the
    /// next history sync recovers them.
    pub fn start_push_listener(self: &Arc<Self>) {
        let mut listener = self.listener.write();
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let mut push = self.channel.subscribe();
        let this: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            while let Some(received) = push.recv().await {
                let Some(sync) = this.upgrade() else {
                    break;
                };
                match received {
                    Ok(encrypted) if sync.codec.is_ready() => {
                        sync.ingest(&encrypted).await;
                    }
                    Ok(encrypted) => {
                        tracing::debug!(
                            "Ignoring push {} without an active session",
                            encrypted.packet_id
                        );
                    }
                    Err(e) => tracing::warn!("Unreadable push: {}", e),
                }
            }
            tracing::debug!("Push listener stopped");
        });

        *listener = Some(handle);
        tracing::info!("Push listener started");
    }

    /// Stop the push listener
    pub fn stop_push_listener(&self) {
        if let Some(handle) = self.listener.write().take() {
            handle.abort();
            tracing::info!("Push listener stopped");
        }
    }
}

impl Drop for PacketSync {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
