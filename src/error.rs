//! # Error Handling
//!
//! Error types for Wolke Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Connectivity Errors   - degrade to offline mode, never fatal      │
//! │  │   ├── NotConnected                                                  │
//! │  │   └── ConnectivityError                                             │
//! │  │                                                                      │
//! │  ├── Protocol Errors       - abort the current sync cycle              │
//! │  │   ├── ProtocolError     - missing/undefined channel acknowledgment  │
//! │  │   └── MalformedPacket   - packet failed to parse                    │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── DecryptionError   - wrong password or corrupted ciphertext    │
//! │  │   ├── EncryptionFailed                                              │
//! │  │   ├── InvalidKey                                                    │
//! │  │   └── KeyDerivationFailed                                           │
//! │  │                                                                      │
//! │  ├── Key Lifecycle Errors                                              │
//! │  │   ├── NoActiveKey                                                   │
//! │  │   ├── NoProfile                                                     │
//! │  │   ├── KeyConflict       - local and remote public keys diverge      │
//! │  │   ├── NoPendingEscrow                                               │
//! │  │   ├── WeakPassword      - rejected before any crypto work           │
//! │  │   └── ReconciliationSuperseded                                      │
//! │  │                                                                      │
//! │  ├── Messaging Errors                                                  │
//! │  │   └── RecipientUnreachable                                          │
//! │  │                                                                      │
//! │  └── Storage Errors                                                    │
//! │      ├── StorageReadError                                              │
//! │      └── StorageWriteError                                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for Wolke Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Wolke Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Connectivity Errors (100-199)
    // ========================================================================

    /// No usable network connection
    #[error("Not connected to the network.")]
    NotConnected,

    /// Transport or server unreachable
    #[error("Server unreachable: {0}")]
    ConnectivityError(String),

    // ========================================================================
    // Protocol Errors (200-299)
    // ========================================================================

    /// Malformed or missing channel acknowledgment
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A packet could not be parsed
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// Wrong escrow password, corrupted ciphertext or undecryptable packet
    #[error("Decryption failed: {0}")]
    DecryptionError(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Invalid key format or length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Key derivation failed
    #[error("Failed to derive keys: {0}")]
    KeyDerivationFailed(String),

    // ========================================================================
    // Key Lifecycle Errors (400-499)
    // ========================================================================

    /// No key pair is currently active
    #[error("No active key pair. Reconcile keys first.")]
    NoActiveKey,

    /// The server has no profile for this session
    #[error("Not logged in: no profile available.")]
    NoProfile,

    /// Local and remote public keys diverge
    #[error("Key conflict: local key {local} differs from escrowed key {remote}")]
    KeyConflict {
        /// Fingerprint of the local public key
        local: String,
        /// Fingerprint of the remote public key
        remote: String,
    },

    /// No escrow record is waiting for a password
    #[error("No escrowed key is awaiting a password.")]
    NoPendingEscrow,

    /// Password is too weak to protect an escrow upload
    #[error("Password too weak for key backup (score {score} of 4)")]
    WeakPassword {
        /// Estimator score (0-4)
        score: u8,
    },

    /// A newer reconciliation started before this one could apply
    #[error("Reconciliation superseded by a newer attempt.")]
    ReconciliationSuperseded,

    // ========================================================================
    // Messaging Errors (500-599)
    // ========================================================================

    /// Target has no discoverable public key or username
    #[error("Recipient unreachable: {0}")]
    RecipientUnreachable(String),

    // ========================================================================
    // Storage Errors (600-699)
    // ========================================================================

    /// Failed to read from storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// - 100-199: Connectivity
    /// - 200-299: Protocol
    /// - 300-399: Crypto
    /// - 400-499: Key lifecycle
    /// - 500-599: Messaging
    /// - 600-699: Storage
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::NotConnected => 100,
            Error::ConnectivityError(_) => 101,

            Error::ProtocolError(_) => 200,
            Error::MalformedPacket(_) => 201,

            Error::DecryptionError(_) => 300,
            Error::EncryptionFailed(_) => 301,
            Error::InvalidKey(_) => 302,
            Error::KeyDerivationFailed(_) => 303,

            Error::NoActiveKey => 400,
            Error::NoProfile => 401,
            Error::KeyConflict { .. } => 402,
            Error::NoPendingEscrow => 403,
            Error::WeakPassword { .. } => 404,
            Error::ReconciliationSuperseded => 405,

            Error::RecipientUnreachable(_) => 500,

            Error::StorageReadError(_) => 600,
            Error::StorageWriteError(_) => 601,

            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
            Error::DeserializationError(_) => 902,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors go away on the next reconciliation pass
    /// without user involvement.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotConnected
                | Error::ConnectivityError(_)
                | Error::ProtocolError(_)
                | Error::ReconciliationSuperseded
        )
    }

    /// Check if this error requires user action
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Error::DecryptionError(_)
                | Error::KeyConflict { .. }
                | Error::WeakPassword { .. }
                | Error::NoProfile
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

/// Encoding failures; read paths map parse failures to `StorageReadError`
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::ConnectivityError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("worker task failed: {}", err))
    }
}

// ============================================================================
// TESTS
// ============================================================================
