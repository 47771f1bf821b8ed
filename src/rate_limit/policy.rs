//! Rate limit policy, error codes and decisions.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::exempt::StaticExemptList;

/// What to do when a limit is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitMode {
    /// No evaluation at all.
    None,
    /// Log and admit.
    Warn,
    /// Reject with 429.
    #[default]
    Block,
    /// Log and reject.
    WarnAndBlock,
}

impl RateLimitMode {
    #[inline]
    pub fn warns(self) -> bool {
        matches!(self, RateLimitMode::Warn | RateLimitMode::WarnAndBlock)
    }

    #[inline]
    pub fn blocks(self) -> bool {
        matches!(self, RateLimitMode::Block | RateLimitMode::WarnAndBlock)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitMode::None => "none",
            RateLimitMode::Warn => "warn",
            RateLimitMode::Block => "block",
            RateLimitMode::WarnAndBlock => "warn+block",
        }
    }
}

impl fmt::Display for RateLimitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown rate limit mode string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown rate limit mode '{0}' (expected none, warn, block or warn+block)")]
pub struct ParseModeError(pub String);

impl FromStr for RateLimitMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(RateLimitMode::None),
            "warn" => Ok(RateLimitMode::Warn),
            "block" => Ok(RateLimitMode::Block),
            "warn+block" | "warn_and_block" => Ok(RateLimitMode::WarnAndBlock),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// Rate limit settings, re-read for every request.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub mode: RateLimitMode,
    /// Requests per 10 seconds. `None` means unlimited.
    pub per_10s_limit: Option<u64>,
    /// Requests per 60 seconds. `None` means unlimited.
    pub per_60s_limit: Option<u64>,
    /// Asset requests per 10 seconds. `None` means unlimited.
    pub per_10s_asset_limit: Option<u64>,
    pub rate_limit_private_ips: bool,
    pub static_exempt: StaticExemptList,
    /// Authenticated users at or above this trust level are limited by
    /// user id instead of IP.
    pub skip_trust_tier: u8,
}

impl RateLimitPolicy {
    /// Policy that never evaluates anything.
    pub fn disabled() -> Self {
        Self {
            mode: RateLimitMode::None,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: RateLimitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_10s_limit(mut self, limit: Option<u64>) -> Self {
        self.per_10s_limit = normalize(limit);
        self
    }

    pub fn with_60s_limit(mut self, limit: Option<u64>) -> Self {
        self.per_60s_limit = normalize(limit);
        self
    }

    pub fn with_asset_limit(mut self, limit: Option<u64>) -> Self {
        self.per_10s_asset_limit = normalize(limit);
        self
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            mode: RateLimitMode::Block,
            per_10s_limit: Some(50),
            per_60s_limit: Some(200),
            per_10s_asset_limit: Some(200),
            rate_limit_private_ips: false,
            static_exempt: StaticExemptList::default(),
            skip_trust_tier: 1,
        }
    }
}

/// Zero is treated as "no limit".
#[inline]
pub(crate) fn normalize(limit: Option<u64>) -> Option<u64> {
    limit.filter(|l| *l > 0)
}

/// Reported reason for an exceeded limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "&'static str")]
pub enum LimitErrorCode {
    Ip10Secs,
    Ip60Secs,
    IpAssets10Secs,
    Id10Secs,
    Id60Secs,
    IdAssets10Secs,
}

impl LimitErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            LimitErrorCode::Ip10Secs => "ip_10_secs_limit",
            LimitErrorCode::Ip60Secs => "ip_60_secs_limit",
            LimitErrorCode::IpAssets10Secs => "ip_assets_10_secs_limit",
            LimitErrorCode::Id10Secs => "id_10_secs_limit",
            LimitErrorCode::Id60Secs => "id_60_secs_limit",
            LimitErrorCode::IdAssets10Secs => "id_assets_10_secs_limit",
        }
    }

    /// True for the asset-path codes.
    pub const fn is_asset(self) -> bool {
        matches!(
            self,
            LimitErrorCode::IpAssets10Secs | LimitErrorCode::IdAssets10Secs
        )
    }
}

impl From<LimitErrorCode> for &'static str {
    fn from(code: LimitErrorCode) -> Self {
        code.as_str()
    }
}

impl fmt::Display for LimitErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decision {
    pub admitted: bool,
    pub error_code: Option<LimitErrorCode>,
    pub retry_after_seconds: Option<u64>,
    pub warned: bool,
}

impl Decision {
    /// Admitted without any limit being exceeded.
    pub const fn admit() -> Self {
        Self {
            admitted: true,
            error_code: None,
            retry_after_seconds: None,
            warned: false,
        }
    }

    #[inline]
    pub fn is_rejected(&self) -> bool {
        !self.admitted
    }
}
