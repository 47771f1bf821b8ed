//! Per-request record handed to the aggregator and detailed loggers.

use std::net::IpAddr;

use serde::Serialize;

use crate::core::BackendTimings;
use crate::identity::RequestClassification;
use crate::rate_limit::LimitErrorCode;

/// Anonymous-cache outcome reported by the downstream through the
/// `X-Discourse-Cached` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    Skip,
    Store,
    Hit,
    Miss,
    Unknown,
}

impl CacheOutcome {
    pub const HEADER: &'static str = "x-discourse-cached";

    /// Parse a header value. `None` when the header was absent.
    pub fn from_header(value: Option<&str>) -> Option<Self> {
        let value = value?.trim();
        Some(match value.to_ascii_lowercase().as_str() {
            "skip" => CacheOutcome::Skip,
            "store" => CacheOutcome::Store,
            "true" | "hit" => CacheOutcome::Hit,
            "false" | "miss" => CacheOutcome::Miss,
            _ => CacheOutcome::Unknown,
        })
    }
}

/// Everything known about one completed request.
///
/// Built once by the tracker and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRecord {
    pub request_id: String,
    /// Unix seconds when the tracker saw the request.
    pub timestamp: f64,
    pub duration_seconds: f64,
    pub status: u16,
    pub method: String,
    pub path: String,
    pub client_ip: IpAddr,
    pub classification: RequestClassification,
    /// Time spent between the load balancer and the tracker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_seconds: Option<f64>,
    pub timing: BackendTimings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheOutcome>,
    /// Set when a limit was exceeded, whether or not the request was
    /// rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limited: Option<LimitErrorCode>,
    /// Only kept for crawlers, for the per-agent crawler counts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestRecord {
    /// Unix day the request belongs to.
    #[inline]
    pub fn day(&self) -> u64 {
        (self.timestamp.max(0.0) as u64) / 86_400
    }

    #[inline]
    pub fn was_rejected(&self) -> bool {
        self.status == 429 && self.rate_limited.is_some()
    }

    #[cfg(test)]
    pub(crate) fn sample() -> Self {
        Self {
            request_id: "0123456789abcdef".to_string(),
            timestamp: 1_609_462_800.0,
            duration_seconds: 0.1,
            status: 200,
            method: "GET".to_string(),
            path: "/".to_string(),
            client_ip: IpAddr::V4(std::net::Ipv4Addr::new(1, 1, 1, 1)),
            classification: RequestClassification::default(),
            queue_seconds: None,
            timing: BackendTimings::default(),
            cache: None,
            rate_limited: None,
            user_agent: None,
        }
    }
}
