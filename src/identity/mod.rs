//! # Identity Module
//!
//! Decides which X25519 key pair is the user's identity and keeps it
//! consistent between this device and the node's escrow.
//!
//! ## Key Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         KEY LIFECYCLE                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                      ┌───────────────┐                                  │
//! │      offline ───────►│ Uninitialized │◄──── delete_local_key / logout  │
//! │                      └───────┬───────┘                                  │
//! │                              │ reconcile(online)                        │
//! │          ┌───────────────────┼────────────────────┐                     │
//! │          ▼                   ▼                    ▼                     │
//! │  ┌───────────────┐  ┌─────────────────┐  ┌────────────────┐            │
//! │  │ NoKeysAnywhere│  │ EscrowNeeds     │  │ KeyConflict    │            │
//! │  │ (generated)   │  │ Password        │  │                │            │
//! │  └───────┬───────┘  └────────┬────────┘  └───────┬────────┘            │
//! │          │ upload_backup     │ unlock_escrow     │ accept_remote_key   │
//! │          ▼                   ▼                   ▼                      │
//! │      ┌──────────────────────────────────────────────┐                  │
//! │      │               EscrowSynced                   │                  │
//! │      └──────────────────────────────────────────────┘                  │
//! │                                                                         │
//! │  Side states: Offline, NoProfile, LocalOnlyDegraded,                   │
//! │               EscrowCorruptDowngrade                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//!
//! - Reconciliation never replaces a local key pair with a different
//!   escrowed one. Only [`KeyReconciler::accept_remote_key`] does, and only
//!   on the user's request.
//! - The active key pair has one writer, the reconciler. Readers take an
//!   `Arc` snapshot through [`ActiveSession`].
//! - A failed escrow decryption commits nothing.

mod decision;
mod reconciler;
mod session;

pub use decision::{
    decide, same_public_key, Effect, Plan, ReconciliationInput, ReconciliationState,
    RemoteEscrow, SecurityWarning,
};
pub use reconciler::KeyReconciler;
pub use session::ActiveSession;
