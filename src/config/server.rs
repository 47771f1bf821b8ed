//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use super::parse::{env_duration, env_opt, env_or};
use super::ConfigError;

/// Server configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8080).
    pub listen_addr: SocketAddr,
    /// Internal server address for /health, /metrics and /counters.
    pub internal_addr: Option<SocketAddr>,
    /// Graceful shutdown drain timeout.
    pub drain_timeout: Duration,
    /// How often buffered request counters are committed.
    pub flush_interval: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr = parse_addr("LISTEN_ADDR", &env_or("LISTEN_ADDR", "0.0.0.0:8080"))?;

        let internal_addr = env_opt("INTERNAL_ADDR")
            .map(|s| parse_addr("INTERNAL_ADDR", &s))
            .transpose()?;

        let drain_timeout =
            env_duration("DRAIN_TIMEOUT", "30s")?.unwrap_or(Duration::from_secs(30));

        let flush_interval = env_duration("FLUSH_INTERVAL", "15s")?.ok_or_else(|| {
            ConfigError::Invalid {
                key: "FLUSH_INTERVAL".into(),
                message: "flush interval cannot be disabled".into(),
            }
        })?;

        Ok(Self {
            listen_addr,
            internal_addr,
            drain_timeout,
            flush_interval,
        })
    }
}

fn parse_addr(key: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|e| ConfigError::Parse {
        key: key.into(),
        value: value.into(),
        error: format!("{}", e),
    })
}
