//! # Configuration
//!
//! Runtime configuration for the core and the connectivity rule that
//! decides whether the current network counts as "connected".

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{keys, KeyValueStore};

/// Default Walderde node serving the profile API and the chat channel
pub const DEFAULT_NODE_URL: &str = "https://walderde.wolkeneis.dev";

/// Environment variable overriding the node URL
pub const NODE_URL_ENV: &str = "WALDERDE_NODE";

/// Largest bounded history request issued in one go
pub const DEFAULT_HISTORY_CHUNK_SIZE: u64 = 1000;

/// Configuration for the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Base URL of the Walderde node
    pub node_url: String,
    /// Treat metered connections as usable
    pub use_all_connection_types: bool,
    /// Ceiling for a single bounded history fetch
    pub history_chunk_size: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            node_url: DEFAULT_NODE_URL.to_string(),
            use_all_connection_types: true,
            history_chunk_size: DEFAULT_HISTORY_CHUNK_SIZE,
        }
    }
}

impl CoreConfig {
    /// Default configuration with the node URL taken from `WALDERDE_NODE`
    /// when set
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(NODE_URL_ENV) {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                config.node_url = url.to_string();
            }
        }
        config
    }

    /// URL of the chat channel namespace
    pub fn chat_namespace(&self) -> String {
        format!("{}/chat", self.node_url.trim_end_matches('/'))
    }

    /// Absolute URL for an API path
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.node_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Apply persisted user preferences on top of this config
    pub fn with_preferences(mut self, preferences: &LocalPreferences) -> Self {
        self.use_all_connection_types = preferences.use_all_connection_types;
        self
    }
}

/// Snapshot of the device's network state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkStatus {
    /// A network path exists
    pub is_connected: bool,
    /// The connection is metered
    pub is_expensive: bool,
}

impl NetworkStatus {
    /// Reachable, unmetered network
    pub fn online() -> Self {
        Self {
            is_connected: true,
            is_expensive: false,
        }
    }

    /// No network
    pub fn offline() -> Self {
        Self::default()
    }

    /// Whether this network may be used under `config`
    ///
    /// Metered connections only count when the user opted into all
    /// connection types.
    pub fn is_usable(&self, config: &CoreConfig) -> bool {
        self.is_connected && (!self.is_expensive || config.use_all_connection_types)
    }
}

/// User preferences persisted under the `config` key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPreferences {
    /// Treat metered connections as usable
    pub use_all_connection_types: bool,
}

impl Default for LocalPreferences {
    fn default() -> Self {
        Self {
            use_all_connection_types: true,
        }
    }
}

impl LocalPreferences {
    /// Load preferences, falling back to defaults when absent or unreadable
    pub async fn load(store: &dyn KeyValueStore) -> Self {
        match store.get(keys::CONFIG).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable preferences: {}", e);
                Self::default()
            }),
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!("Failed to read preferences: {}", e);
                Self::default()
            }
        }
    }

    /// Persist preferences
    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        store.set(keys::CONFIG, &serde_json::to_string(self)?).await
    }
}

// ============================================================================
// TESTS
// ============================================================================
