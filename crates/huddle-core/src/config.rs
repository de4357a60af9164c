//! Transport configuration.

use crate::engine::EngineNetworkMode;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// How peers reach each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// Everything on the loopback interface
    Loopback,
    /// Direct UDP on the local network
    #[default]
    Local,
    /// Engine traffic is carried by relay allocations through the multiplexer
    ExternalRelay,
    /// A relay node joins the session; the host allocates it, followers wait for it
    NodeRelay,
}

impl NetworkMode {
    /// Mode the engine is initialized with
    #[must_use]
    pub const fn engine_mode(self) -> EngineNetworkMode {
        match self {
            NetworkMode::Loopback => EngineNetworkMode::Loopback,
            NetworkMode::Local | NetworkMode::NodeRelay => EngineNetworkMode::Local,
            NetworkMode::ExternalRelay => EngineNetworkMode::External,
        }
    }

    /// Whether engine packets go through the relay multiplexer
    #[must_use]
    pub const fn uses_multiplexer(self) -> bool {
        matches!(self, NetworkMode::ExternalRelay)
    }

    /// Whether the session needs a relay allocation before it can start
    #[must_use]
    pub const fn requires_relay_allocation(self) -> bool {
        matches!(self, NetworkMode::NodeRelay)
    }
}

/// Settings shared by every peer of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Number of address book entries (relay node included) needed to start
    #[serde(default = "default_total_nodes")]
    pub total_nodes: u16,
    /// Engine bind port, 0 for ephemeral
    #[serde(default)]
    pub bind_port: u16,
    /// Engine sync interval in milliseconds
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u32,
    /// Networking mode
    #[serde(default)]
    pub network_mode: NetworkMode,
    /// Default `tracing` filter
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_total_nodes() -> u16 {
    2
}

fn default_sync_interval_ms() -> u32 {
    33
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            total_nodes: default_total_nodes(),
            bind_port: 0,
            sync_interval_ms: default_sync_interval_ms(),
            network_mode: NetworkMode::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl TransportConfig {
    /// Parse from TOML text and validate
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or invalid values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or is invalid.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_nodes == 0 {
            return Err(ConfigError::Invalid("total_nodes must be at least 1"));
        }
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::Invalid("sync_interval_ms must be positive"));
        }
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::Invalid("log_filter must not be empty"));
        }
        Ok(())
    }

    /// Quorum size as a count
    #[must_use]
    pub fn total_nodes(&self) -> usize {
        usize::from(self.total_nodes)
    }

    /// Sync interval
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.sync_interval_ms))
    }
}
