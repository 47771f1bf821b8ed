//! Access logging.
//!
//! Logs completed requests in a structured format for analysis.

use crate::analytics::RequestRecord;
use crate::hooks::{DetailedRequestLogger, HookError};

/// Detailed request logger that writes one access event per request.
///
/// Log entries are emitted at INFO level with target "access".
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessLogger;

impl AccessLogger {
    pub fn new() -> Self {
        Self
    }
}

impl DetailedRequestLogger for AccessLogger {
    fn log(&self, record: &RequestRecord) -> Result<(), HookError> {
        let c = &record.classification;
        let duration_ms = record.duration_seconds * 1000.0;

        tracing::info!(
            target: "access",
            request_id = %record.request_id,
            ip = %record.client_ip,
            method = %record.method,
            path = %record.path,
            status = record.status,
            duration_ms = duration_ms,
            queue_ms = record.queue_seconds.map(|q| q * 1000.0),
            sql_calls = record.timing.sql.calls,
            redis_calls = record.timing.redis.calls,
            crawler = c.is_crawler,
            mobile = c.is_mobile,
            logged_in = c.is_logged_in(),
            page_view = c.is_page_view,
            asset = c.is_asset_path,
            rate_limited = record.rate_limited.map(|code| code.as_str()),
            ua = record.user_agent.as_deref(),
            "{} {} {}",
            record.method,
            record.path,
            record.status
        );

        Ok(())
    }
}
