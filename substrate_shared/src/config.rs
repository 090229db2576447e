//! Configuration system.
//!
//! Loads sync configuration from JSON strings/files (file IO left to app).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Snapshot broadcast interval in milliseconds.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// How long the client waits for its assigned id before giving up.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Client retry behavior after the server explicitly closes.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

/// Retry behavior after a server-initiated close. An explicit, testable
/// parameter rather than a hardcoded single immediate retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Attempts before giving up. Zero disables reconnection.
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: u32,
    /// Delay before each attempt in milliseconds.
    #[serde(default)]
    pub backoff_ms: u64,
}

fn default_sync_interval_ms() -> u64 {
    100
}

fn default_handshake_timeout_ms() -> u64 {
    2000
}

fn default_reconnect_attempts() -> u32 {
    1
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_reconnect_attempts(),
            backoff_ms: 0,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            sync_interval_ms: default_sync_interval_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl ReconnectPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
