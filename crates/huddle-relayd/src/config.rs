//! Relay daemon configuration.

use huddle_relay::udp::RelayServerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Relay daemon settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaydConfig {
    /// UDP address to listen on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Maximum concurrent allocations
    #[serde(default = "default_max_allocations")]
    pub max_allocations: usize,
    /// Seconds of silence before an allocation expires
    #[serde(default = "default_allocation_timeout_secs")]
    pub allocation_timeout_secs: u64,
    /// Default `tracing` filter
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 26470))
}

fn default_max_allocations() -> usize {
    1000
}

fn default_allocation_timeout_secs() -> u64 {
    60
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for RelaydConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_allocations: default_max_allocations(),
            allocation_timeout_secs: default_allocation_timeout_secs(),
            log_filter: default_log_filter(),
        }
    }
}

impl RelaydConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Check for unusable values
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.max_allocations > 0, "max_allocations must be at least 1");
        anyhow::ensure!(
            self.allocation_timeout_secs > 0,
            "allocation_timeout_secs must be at least 1"
        );
        Ok(())
    }

    /// Server settings derived from this configuration
    #[must_use]
    pub fn server_config(&self) -> RelayServerConfig {
        let allocation_timeout = Duration::from_secs(self.allocation_timeout_secs);
        RelayServerConfig {
            max_allocations: self.max_allocations,
            allocation_timeout,
            cleanup_interval: (allocation_timeout / 4).max(Duration::from_secs(1)),
        }
    }
}
