//! Key reconciliation decision table.
//!
//! [`decide`] is a pure function from what was observed to the state to
//! enter and the effects to run. It performs no I/O, so every row of the
//! table is tested directly.
//!
//! ```text
//! connected │ profile │ local │ remote          │ state                  │ effects
//! ──────────┼─────────┼───────┼─────────────────┼────────────────────────┼──────────────────────────────
//!   no      │    -    │  yes  │       -         │ LocalOnlyDegraded      │ activate
//!   no      │    -    │  no   │       -         │ Uninitialized          │ -
//!   yes     │   no    │   -   │       -         │ NoProfile              │ profile missing
//!   yes     │   yes   │  yes  │ Empty/failed    │ LocalOnlyDegraded      │ revert connectivity, activate
//!   yes     │   yes   │  yes  │ Complete, same  │ EscrowSynced           │ activate, sync
//!   yes     │   yes   │  yes  │ Complete, other │ KeyConflict            │ activate, raise conflict
//!   yes     │   yes   │  yes  │ PublicKeyOnly   │ EscrowCorruptDowngrade │ activate, warn, sync
//!   yes     │   yes   │  no   │ Complete        │ EscrowNeedsPassword    │ request password
//!   yes     │   yes   │  no   │ PubKeyOnly/Empty│ NoKeysAnywhere         │ generate, publish, backup
//!   yes     │   yes   │  no   │ failed          │ Offline                │ revert connectivity
//! ```

use serde::{Deserialize, Serialize};

use crate::crypto::decode_public_key;
use crate::escrow::EscrowPayload;

/// Where key reconciliation settled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReconciliationState {
    /// Nothing decided yet, or offline without a local key
    #[default]
    Uninitialized,
    /// The escrow could not be fetched and there is no local key
    Offline,
    /// The node has no profile for this session
    NoProfile,
    /// A fresh identity was generated and its public key published
    NoKeysAnywhere,
    /// Local key active, escrow unknown or unreachable
    LocalOnlyDegraded,
    /// Local key matches the escrowed key
    EscrowSynced,
    /// Escrowed key waits for its password
    EscrowNeedsPassword,
    /// A public key was published but its backup is missing
    EscrowCorruptDowngrade,
    /// Local and escrowed keys differ
    KeyConflict,
}

impl ReconciliationState {
    /// Whether a key pair is usable for messaging in this state
    pub fn has_active_key(self) -> bool {
        matches!(
            self,
            Self::NoKeysAnywhere
                | Self::LocalOnlyDegraded
                | Self::EscrowSynced
                | Self::EscrowCorruptDowngrade
                | Self::KeyConflict
        )
    }

    /// Whether the user must act before the state can change
    pub fn requires_user_action(self) -> bool {
        matches!(
            self,
            Self::NoProfile | Self::EscrowNeedsPassword | Self::KeyConflict
        )
    }
}

impl std::fmt::Display for ReconciliationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Outcome of the escrow fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEscrow {
    /// The node answered
    Fetched(EscrowPayload),
    /// Transport failure, or not attempted
    Unreachable,
}

/// What one reconciliation pass observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationInput {
    /// Effective connectivity
    pub connected: bool,
    /// Whether the own profile was fetched
    pub profile_present: bool,
    /// Public key of the stored local key pair, if any
    pub local_public_key: Option<String>,
    /// Escrow fetch result
    pub remote: RemoteEscrow,
}

/// Why a security warning is raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityWarning {
    /// A public key is published but no complete backup exists
    EscrowDowngraded,
}

impl SecurityWarning {
    /// Text shown to the user
    pub fn reason(self) -> &'static str {
        match self {
            Self::EscrowDowngraded => {
                "key backup is missing although a public key was published; it may have been tampered with"
            }
        }
    }
}

/// Side effect of a reconciliation pass, run in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Install the stored key pair as the active key
    ActivateLocalKey,
    /// Create, persist and activate a new key pair
    GenerateKeyPair,
    /// Publish the active public key without a backup
    PublishPublicKey,
    /// Flag that the identity has no cloud backup
    MarkBackupDesired,
    /// Keep the escrow record and ask for its password
    RequestPassword,
    /// Notify the user of a suspicious escrow
    Warn(SecurityWarning),
    /// Keep the escrow record and report diverging keys
    RaiseConflict,
    /// Treat the connection as unusable
    RevertConnectivity,
    /// Ask the user to log in
    ReportProfileMissing,
    /// Run a full history sync; always last
    SyncHistory,
}

/// State to enter and effects to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Resulting state
    pub state: ReconciliationState,
    /// Effects, in order
    pub effects: Vec<Effect>,
}

impl Plan {
    fn new(state: ReconciliationState, effects: Vec<Effect>) -> Self {
        Self { state, effects }
    }

    /// Whether the plan contains `effect`
    pub fn has(&self, effect: Effect) -> bool {
        self.effects.contains(&effect)
    }
}

/// Compare two base64 public keys by their decoded bytes
pub fn same_public_key(a: &str, b: &str) -> bool {
    match (decode_public_key(a), decode_public_key(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

/// Run the decision table
pub fn decide(input: &ReconciliationInput) -> Plan {
    use Effect::*;
    use ReconciliationState as S;

    if !input.connected {
        return match input.local_public_key {
            Some(_) => Plan::new(S::LocalOnlyDegraded, vec![ActivateLocalKey]),
            None => Plan::new(S::Uninitialized, vec![]),
        };
    }

    if !input.profile_present {
        return Plan::new(S::NoProfile, vec![ReportProfileMissing]);
    }

    match (&input.local_public_key, &input.remote) {
        (Some(_), RemoteEscrow::Unreachable | RemoteEscrow::Fetched(EscrowPayload::Empty)) => {
            Plan::new(
                S::LocalOnlyDegraded,
                vec![RevertConnectivity, ActivateLocalKey],
            )
        }
        (Some(local), RemoteEscrow::Fetched(EscrowPayload::Complete(record))) => {
            if same_public_key(local, &record.public_key) {
                Plan::new(S::EscrowSynced, vec![ActivateLocalKey, SyncHistory])
            } else {
                Plan::new(S::KeyConflict, vec![ActivateLocalKey, RaiseConflict])
            }
        }
        (Some(_), RemoteEscrow::Fetched(EscrowPayload::PublicKeyOnly(_))) => Plan::new(
            S::EscrowCorruptDowngrade,
            vec![
                ActivateLocalKey,
                Warn(SecurityWarning::EscrowDowngraded),
                SyncHistory,
            ],
        ),
        (None, RemoteEscrow::Fetched(EscrowPayload::Complete(_))) => {
            Plan::new(S::EscrowNeedsPassword, vec![RequestPassword])
        }
        (
            None,
            RemoteEscrow::Fetched(EscrowPayload::PublicKeyOnly(_) | EscrowPayload::Empty),
        ) => Plan::new(
            S::NoKeysAnywhere,
            vec![GenerateKeyPair, PublishPublicKey, MarkBackupDesired],
        ),
        (None, RemoteEscrow::Unreachable) => Plan::new(S::Offline, vec![RevertConnectivity]),
    }
}

// ============================================================================
// TESTS
// ============================================================================
