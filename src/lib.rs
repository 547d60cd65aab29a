//! # Wolke Core
//!
//! Key management and encrypted messaging core for the Wolke chat client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          WOLKE CORE                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  connectivity change                                                   │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  ┌──────────────┐   escrow    ┌──────────────┐                         │
//! │  │ KeyReconciler│────────────►│ KeyEscrow    │  PBKDF2 + AES-CBC       │
//! │  │ (identity)   │             │ (escrow)     │  on the blocking pool   │
//! │  └──────┬───────┘             └──────────────┘                         │
//! │         │ activates                                                     │
//! │         ▼                                                               │
//! │  ┌──────────────┐  peer keys  ┌──────────────┐                         │
//! │  │ ActiveSession│◄────────────│ SessionCache │◄── ProfileApi (HTTP)    │
//! │  └──────┬───────┘             │ (peers)      │                         │
//! │         │                     └──────▲───────┘                         │
//! │         ▼                            │                                  │
//! │  ┌──────────────┐             ┌──────┴───────┐                         │
//! │  │ MessageCodec │◄────────────│ PacketSync   │◄── PacketChannel        │
//! │  │ (messaging)  │             │ (sync)       │    (ChannelTransport)   │
//! │  └──────────────┘             └──────┬───────┘                         │
//! │                                      ▼                                  │
//! │                               ┌──────────────┐                         │
//! │                               │ PacketStore  │  keyed by packetId      │
//! │                               └──────────────┘                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Seams
//!
//! The embedding application supplies three implementations:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`api::ProfileApi`] | Profile, escrow and contact endpoints ([`api::HttpProfileApi`] is provided) |
//! | [`channel::ChannelTransport`] | Persistent chat socket |
//! | [`storage::KeyValueStore`] | Secure on-device storage ([`storage::SecureStore`] keeps it in memory) |
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use wolke_core::{CoreConfig, KeyReconciler, NetworkStatus};
//! use wolke_core::api::HttpProfileApi;
//!
//! let config = CoreConfig::from_env();
//! let api = Arc::new(HttpProfileApi::new(config.clone())?);
//! let core = KeyReconciler::new(config, api, transport, store);
//! core.load_preferences().await;
//!
//! match core.reconcile(NetworkStatus::online()).await? {
//!     ReconciliationState::EscrowNeedsPassword => core.unlock_escrow(&password).await?,
//!     state => println!("keys: {}", state),
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod api;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod escrow;
pub mod events;
pub mod identity;
pub mod messaging;
pub mod peers;
pub mod storage;
pub mod sync;
/// Wall-clock helpers for message timestamps.
pub mod time;

#[cfg(test)]
mod test_support;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::{CoreConfig, LocalPreferences, NetworkStatus};
pub use crypto::KeyPair;
pub use error::{Error, Result};
pub use events::CoreEvent;
pub use identity::{ActiveSession, KeyReconciler, ReconciliationState};
pub use messaging::{EncryptedPacket, MessageCodec, Packet};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
