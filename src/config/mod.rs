//! Configuration module for request_tracker.
//!
//! This module provides centralized configuration loading from environment variables.
//!
//! # Example
//!
//! ```rust,no_run
//! use request_tracker::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Listen address: {}", config.server.listen_addr);
//! println!("Mode: {}", config.rate_limit.mode);
//! # Ok::<(), request_tracker::config::ConfigError>(())
//! ```

mod error;
mod logging;
mod parse;
mod rate_limit;
mod server;
mod tracker;

pub use error::ConfigError;
pub use logging::LoggingConfig;
pub use rate_limit::RateLimitConfig;
pub use server::ServerConfig;
pub use tracker::TrackerConfig;

/// Complete application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Global rate limit configuration.
    pub rate_limit: RateLimitConfig,
    /// Tracker configuration.
    pub tracker: TrackerConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            rate_limit: RateLimitConfig::from_env()?,
            tracker: TrackerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("  Listen: {}", self.server.listen_addr);

        if let Some(ref internal) = self.server.internal_addr {
            info!("  Internal server: {}", internal);
        }

        info!("  Counter flush interval: {:?}", self.server.flush_interval);
        info!("  Rate limit mode: {}", self.rate_limit.mode);
        info!(
            "  Limits: {}/10s, {}/60s, {} assets/10s",
            self.rate_limit.per_10_seconds,
            self.rate_limit.per_minute,
            self.rate_limit.assets_per_10_seconds
        );

        if self.rate_limit.limit_private {
            info!("  Private addresses: rate limited");
        }

        if !self.rate_limit.static_ip_skipper.is_empty() {
            info!("  Static IP skipper: {}", self.rate_limit.static_ip_skipper);
        }

        if self.tracker.cookie_secret.is_some() {
            info!(
                "  Auth cookie: enabled (max age {}s, per-user limits from trust level {})",
                self.tracker.cookie_max_age.as_secs(),
                self.rate_limit.skip_trust_level
            );
        } else {
            info!("  Auth cookie: disabled");
        }

        if self.tracker.performance_headers {
            info!("  Performance headers: enabled");
        }

        if self.tracker.login_required {
            info!("  Login required: yes");
        }
    }
}
