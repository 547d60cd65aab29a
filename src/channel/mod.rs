//! # Packet Channel
//!
//! Request/acknowledge protocol over the node's persistent chat channel.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       CHAT CHANNEL EVENTS                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  client → server   "range"    {}                  → integer | undefined│
//! │  client → server   "packets"  {start?, range?}    → [EncryptedPacket]  │
//! │  client → server   "packet"   {receiver, content} → EncryptedPacket    │
//! │  server → client   "packet"   EncryptedPacket       (push)             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The channel carries no resumption token. After every reconnect the
//! caller runs [`PacketChannel::query_range`] and [`PacketChannel::fetch_all`]
//! from scratch. Nothing here deduplicates; storage keyed by `packetId`
//! does.
//!
//! The socket itself sits behind [`ChannelTransport`] so the embedding
//! application can supply whatever client library its platform offers.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::messaging::{EncryptedPacket, OutgoingPacket};

/// Range query event
pub const RANGE_EVENT: &str = "range";

/// History fetch event
pub const PACKETS_EVENT: &str = "packets";

/// Send and push event
pub const PACKET_EVENT: &str = "packet";

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Pagination of a history fetch
///
/// Both fields absent is the node's unranged default page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Offset of the first packet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    /// Number of packets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<u64>,
}

impl HistoryQuery {
    /// The unranged default request
    pub fn unranged() -> Self {
        Self::default()
    }

    /// A bounded request of `range` packets from `start`
    pub fn bounded(start: u64, range: u64) -> Self {
        Self {
            start: Some(start),
            range: Some(range),
        }
    }

    /// Whether this request carries a bound
    pub fn is_bounded(&self) -> bool {
        self.range.is_some()
    }
}

/// Client-initiated channel requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    /// Count packets visible to this identity
    Range,
    /// Fetch a page of history
    Packets(HistoryQuery),
    /// Send a packet
    Packet(OutgoingPacket),
}

impl ChannelRequest {
    /// Event name on the wire
    pub fn event(&self) -> &'static str {
        match self {
            Self::Range => RANGE_EVENT,
            Self::Packets(_) => PACKETS_EVENT,
            Self::Packet(_) => PACKET_EVENT,
        }
    }

    /// JSON payload on the wire
    pub fn payload(&self) -> Result<Value> {
        Ok(match self {
            Self::Range => Value::Object(Default::default()),
            Self::Packets(query) => serde_json::to_value(query)?,
            Self::Packet(packet) => serde_json::to_value(packet)?,
        })
    }
}

/// An event pushed by the server
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    /// Event name
    pub event: String,
    /// JSON payload
    pub payload: Value,
}

// ============================================================================
// TRANSPORT SEAM
// ============================================================================

/// Persistent, authenticated socket to the node's chat namespace
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Emit an event and wait for its acknowledgment
    ///
    /// `Ok(None)` means the server acknowledged with nothing (`undefined`).
    /// An unreachable server is a `ConnectivityError`.
    async fn emit(&self, event: &str, payload: Value) -> Result<Option<Value>>;

    /// Receive server-initiated events
    fn subscribe(&self) -> broadcast::Receiver<ServerEvent>;

    /// Drop and re-establish the connection (new session cookie)
    async fn reconnect(&self) -> Result<()>;
}

// ============================================================================
// PACKET CHANNEL
// ============================================================================

/// Typed packet protocol over a [`ChannelTransport`]
pub struct PacketChannel {
    transport: Arc<dyn ChannelTransport>,
    chunk_size: u64,
}

impl PacketChannel {
    /// Wrap a transport; `chunk_size` caps the bounded history request
    pub fn new(transport: Arc<dyn ChannelTransport>, chunk_size: u64) -> Self {
        Self {
            transport,
            chunk_size: chunk_size.max(1),
        }
    }

    async fn request(&self, request: ChannelRequest) -> Result<Value> {
        let event = request.event();
        tracing::debug!("Channel request: {}", event);

        match self.transport.emit(event, request.payload()?).await? {
            Some(Value::Null) | None => Err(Error::ProtocolError(format!(
                "no acknowledgment for '{}'",
                event
            ))),
            Some(value) => Ok(value),
        }
    }

    /// Number of packets visible to the current identity
    ///
    /// A missing acknowledgment is a protocol failure, never zero.
    pub async fn query_range(&self) -> Result<u64> {
        let value = self.request(ChannelRequest::Range).await?;
        value
            .as_u64()
            .ok_or_else(|| Error::ProtocolError(format!("range is not a count: {}", value)))
    }

    /// Fetch one page of history
    pub async fn fetch_history(&self, query: HistoryQuery) -> Result<Vec<EncryptedPacket>> {
        let value = self.request(ChannelRequest::Packets(query)).await?;
        let packets: Vec<EncryptedPacket> = serde_json::from_value(value)
            .map_err(|e| Error::MalformedPacket(format!("history page: {}", e)))?;
        tracing::debug!(
            "Fetched {} packets (start: {:?}, range: {:?})",
            packets.len(),
            query.start,
            query.range
        );
        Ok(packets)
    }

    /// Requests issued for a full history sync of `range` packets
    ///
    /// The unranged default always goes first. A single bounded request of
    /// at most one chunk follows when there is anything to fetch.
    pub fn history_plan(&self, range: u64) -> Vec<HistoryQuery> {
        let mut plan = vec![HistoryQuery::unranged()];
        if range > 0 {
            plan.push(HistoryQuery::bounded(0, range.min(self.chunk_size)));
        }
        plan
    }

    /// Run [`history_plan`](Self::history_plan) and concatenate the pages
    ///
    /// Pages overlap; duplicates are expected.
    pub async fn fetch_all(&self, range: u64) -> Result<Vec<EncryptedPacket>> {
        let pages = try_join_all(
            self.history_plan(range)
                .into_iter()
                .map(|query| self.fetch_history(query)),
        )
        .await?;
        Ok(pages.into_iter().flatten().collect())
    }

    /// Send a packet and return the server's stored form
    pub async fn send(&self, packet: &OutgoingPacket) -> Result<EncryptedPacket> {
        let value = self.request(ChannelRequest::Packet(packet.clone())).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::MalformedPacket(format!("send acknowledgment: {}", e)))
    }

    /// Receive pushed packets
    pub fn subscribe(&self) -> PushReceiver {
        PushReceiver {
            rx: self.transport.subscribe(),
        }
    }

    /// Re-establish the underlying connection
    pub async fn reconnect(&self) -> Result<()> {
        tracing::info!("Reconnecting chat channel");
        self.transport.reconnect().await
    }
}

/// Stream of pushed packets, filtered from all server events
pub struct PushReceiver {
    rx: broadcast::Receiver<ServerEvent>,
}

impl PushReceiver {
    /// Next pushed packet
    ///
    /// `None` once the transport is gone. A payload that does not parse is
    /// returned as `MalformedPacket`; lagging skips ahead after a warning.
    pub async fn recv(&mut self) -> Option<Result<EncryptedPacket>> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.event == PACKET_EVENT => {
                    return Some(
                        serde_json::from_value(event.payload)
                            .map_err(|e| Error::MalformedPacket(format!("push: {}", e))),
                    );
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Push receiver lagged, {} events skipped; next history sync recovers them",
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
