//! Global rate limit configuration.

use crate::rate_limit::{RateLimitMode, RateLimitPolicy, StaticExemptList};

use super::parse::{env_bool, env_or, env_parse};
use super::ConfigError;

/// Rate limit settings loaded from environment.
///
/// Limits of 0 disable the corresponding check.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub mode: RateLimitMode,
    pub per_10_seconds: u64,
    pub per_minute: u64,
    pub assets_per_10_seconds: u64,
    /// Also limit private, loopback and link-local addresses.
    pub limit_private: bool,
    /// Minimum trust level limited per user instead of per IP.
    pub skip_trust_level: u8,
    /// Raw static allow list (IPs and CIDR ranges).
    pub static_ip_skipper: String,
}

impl RateLimitConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_mode = env_or("DISCOURSE_MAX_REQS_PER_IP_MODE", "block");
        let mode = raw_mode
            .parse::<RateLimitMode>()
            .map_err(|e| ConfigError::Invalid {
                key: "DISCOURSE_MAX_REQS_PER_IP_MODE".into(),
                message: e.to_string(),
            })?;

        Ok(Self {
            mode,
            per_10_seconds: env_parse("DISCOURSE_MAX_REQS_PER_IP_PER_10_SECONDS", 50)?,
            per_minute: env_parse("DISCOURSE_MAX_REQS_PER_IP_PER_MINUTE", 200)?,
            assets_per_10_seconds: env_parse(
                "DISCOURSE_MAX_ASSET_REQS_PER_IP_PER_10_SECONDS",
                200,
            )?,
            limit_private: env_bool("DISCOURSE_MAX_REQS_RATE_LIMIT_ON_PRIVATE", false),
            skip_trust_level: env_parse("DISCOURSE_SKIP_PER_IP_RATE_LIMIT_TRUST_LEVEL", 1)?,
            static_ip_skipper: env_or("DISCOURSE_STATIC_IP_SKIPPER", ""),
        })
    }

    /// Build the policy the rate limiter evaluates.
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            mode: self.mode,
            rate_limit_private_ips: self.limit_private,
            static_exempt: StaticExemptList::parse(&self.static_ip_skipper),
            skip_trust_tier: self.skip_trust_level,
            ..RateLimitPolicy::default()
        }
        .with_10s_limit(Some(self.per_10_seconds))
        .with_60s_limit(Some(self.per_minute))
        .with_asset_limit(Some(self.assets_per_10_seconds))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            mode: RateLimitMode::Block,
            per_10_seconds: 50,
            per_minute: 200,
            assets_per_10_seconds: 200,
            limit_private: false,
            skip_trust_level: 1,
            static_ip_skipper: String::new(),
        }
    }
}
