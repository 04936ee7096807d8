//! Engine tunables
//!
//! Every field has a default, so a config file only needs the keys it
//! overrides:
//!
//! ```json
//! { "connect_timeout_ms": 2000, "bind_address": "127.0.0.1" }
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;

pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 8 * 1024;
pub const DEFAULT_UDP_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interface every worker binds its local port on
    pub bind_address: IpAddr,
    /// Largest chunk one relay direction reads before writing it on
    pub relay_buffer_size: usize,
    /// Receive buffer for UDP workers; longer datagrams are truncated
    pub udp_buffer_size: usize,
    /// Bound on resolving plus connecting to a TCP target
    pub connect_timeout_ms: u64,
    /// Bound on waiting for a stopped worker's connections to finish
    pub drain_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            relay_buffer_size: DEFAULT_RELAY_BUFFER_SIZE,
            udp_buffer_size: DEFAULT_UDP_BUFFER_SIZE,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Load a config file, falling back to defaults when it does not exist
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay_buffer_size == 0 {
            return Err(ConfigError::Invalid("relay_buffer_size must be non-zero".into()));
        }
        if self.udp_buffer_size == 0 {
            return Err(ConfigError::Invalid("udp_buffer_size must be non-zero".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connect_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
