//! The request tracker.
//!
//! ```text
//! resolve identity -> rate limit check -+-> rejected: 429 -> record -> respond
//!                                       |
//!                                       +-> admitted: downstream -> measure
//!                                             -> reconcile asset -> record -> respond
//! ```

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use http::{Method, StatusCode};

use crate::analytics::{CacheOutcome, RequestRecord};
use crate::core::{Backend, BackendTimings, Context, Error, Request, Response};
use crate::identity::{is_page_view, RequestClassification};
use crate::rate_limit::LimitErrorCode;
use crate::runtime::TrackerRuntime;

use super::Handler;

/// Rate limits, measures and records every request passed through it.
///
/// Cheap to clone; all state lives in the shared [`TrackerRuntime`].
#[derive(Clone)]
pub struct RequestTracker {
    runtime: Arc<TrackerRuntime>,
}

/// What is known about a request before the downstream runs.
struct Seen {
    timestamp: f64,
    method: Method,
    path: String,
    track_view: Option<String>,
    user_agent: Option<String>,
    queue_seconds: Option<f64>,
    rate_limited: Option<LimitErrorCode>,
}

impl Seen {
    fn into_record(
        self,
        ctx: &Context,
        classification: RequestClassification,
        status: u16,
        cache: Option<CacheOutcome>,
        duration_seconds: f64,
    ) -> RequestRecord {
        RequestRecord {
            request_id: ctx.request_id.clone(),
            timestamp: self.timestamp,
            duration_seconds,
            status,
            method: self.method.to_string(),
            path: self.path,
            client_ip: ctx.client_ip,
            classification,
            queue_seconds: self.queue_seconds,
            timing: ctx.backend_timings().clone(),
            cache,
            rate_limited: self.rate_limited,
            user_agent: self.user_agent,
        }
    }
}

impl RequestTracker {
    pub fn new(runtime: Arc<TrackerRuntime>) -> Self {
        Self { runtime }
    }

    #[inline]
    pub fn runtime(&self) -> &Arc<TrackerRuntime> {
        &self.runtime
    }

    /// Run one request through the tracker.
    ///
    /// Rejected requests never reach `downstream`. A downstream error is
    /// recorded as a 500 and returned unchanged; a downstream panic is
    /// recorded as a 500 and then resumed.
    pub fn handle<H>(&self, req: Request, ctx: &mut Context, downstream: &H) -> Result<Response, Error>
    where
        H: Handler + ?Sized,
    {
        let rt = &*self.runtime;
        let started = Instant::now();
        let now = rt.clock().now_secs_f64();
        let policy = rt.policy();

        let queue_seconds = req
            .request_start()
            .and_then(parse_request_start)
            .map(|start| (now - start).max(0.0));

        let (subject, mut classification) =
            rt.resolver()
                .resolve(&req, ctx, policy.skip_trust_tier, now as u64);

        let evaluation = rt
            .limiter()
            .evaluate(ctx.client_ip, &subject, &classification, &policy, now);
        let decision = &evaluation.decision;
        if let Some(code) = decision.error_code {
            rt.metrics()
                .record_rate_limit(code, decision.is_rejected(), decision.warned);
        }

        let seen = Seen {
            timestamp: now,
            method: req.method().clone(),
            path: req.path().to_string(),
            track_view: req.track_view().map(str::to_owned),
            user_agent: classification
                .is_crawler
                .then(|| req.user_agent().map(|ua| ua.into_owned()))
                .flatten(),
            queue_seconds,
            rate_limited: decision.error_code,
        };

        if let (false, Some(code)) = (decision.admitted, decision.error_code) {
            let retry_after = decision.retry_after_seconds.unwrap_or(1);
            tracing::debug!(
                request_id = %ctx.request_id,
                ip = %ctx.client_ip,
                subject = %subject,
                code = %code,
                retry_after,
                "Request rate limited"
            );

            let response = Response::rate_limited(code.as_str(), retry_after);
            let record = seen.into_record(
                ctx,
                classification,
                response.status().as_u16(),
                None,
                started.elapsed().as_secs_f64(),
            );
            self.finish(&record);
            return Ok(response);
        }

        let result = match catch_unwind(AssertUnwindSafe(|| downstream.call(req, &mut *ctx))) {
            Ok(result) => result,
            Err(panic) => {
                tracing::warn!(request_id = %ctx.request_id, "Downstream handler panicked");
                let record = seen.into_record(
                    ctx,
                    classification,
                    StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                    None,
                    started.elapsed().as_secs_f64(),
                );
                self.finish(&record);
                resume_unwind(panic);
            }
        };
        let runtime_seconds = started.elapsed().as_secs_f64();

        if ctx.is_asset_path() {
            classification.is_asset_path = true;
            rt.limiter().reconcile_asset(&evaluation.ticket, now as u64);
        }

        match result {
            Ok(mut response) => {
                classification.is_page_view = is_page_view(
                    response.status(),
                    &seen.method,
                    response.content_type(),
                    classification.is_asset_path,
                    seen.track_view.as_deref(),
                );
                let cache = CacheOutcome::from_header(response.header(CacheOutcome::HEADER));

                if rt.performance_headers() {
                    add_performance_headers(
                        &mut response,
                        seen.queue_seconds,
                        ctx.backend_timings(),
                        runtime_seconds,
                    );
                }

                let record = seen.into_record(
                    ctx,
                    classification,
                    response.status().as_u16(),
                    cache,
                    runtime_seconds,
                );
                self.finish(&record);
                Ok(response)
            }
            Err(e) => {
                tracing::debug!(request_id = %ctx.request_id, error = %e, "Downstream handler failed");
                let record = seen.into_record(
                    ctx,
                    classification,
                    StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                    None,
                    runtime_seconds,
                );
                self.finish(&record);
                Err(e)
            }
        }
    }

    /// Hand a completed record to metrics, the aggregator and the detailed
    /// loggers. Nothing here can fail the request.
    fn finish(&self, record: &RequestRecord) {
        let rt = &*self.runtime;
        rt.metrics()
            .record_request(record.status, record.duration_seconds, record.queue_seconds);

        if catch_unwind(AssertUnwindSafe(|| rt.aggregator().record(record))).is_err() {
            tracing::warn!(request_id = %record.request_id, "Request aggregator panicked");
            rt.metrics().record_hook_failures("aggregator", 1);
        }

        let failures = rt.loggers().dispatch(record);
        rt.metrics().record_hook_failures("detailed_logger", failures);
    }
}

/// Parse `X-Request-Start` into unix seconds.
///
/// Accepts `t=<seconds>` (fractional) or a bare millisecond value.
pub fn parse_request_start(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let secs = match raw.strip_prefix("t=") {
        Some(secs) => secs.trim().parse::<f64>().ok()?,
        None => raw.parse::<f64>().ok()? / 1000.0,
    };
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

fn add_performance_headers(
    response: &mut Response,
    queue_seconds: Option<f64>,
    timings: &BackendTimings,
    runtime_seconds: f64,
) {
    if let Some(queue) = queue_seconds {
        response.set_header("X-Queue-Time", format!("{:.6}", queue));
    }
    for backend in Backend::ALL {
        let timing = timings.get(backend);
        let name = backend.header_name();
        response.set_header(format!("X-{}-Calls", name), timing.calls.to_string());
        response.set_header(
            format!("X-{}-Time", name),
            format!("{:.6}", timing.duration_seconds),
        );
    }
    response.set_header("X-Runtime", format!("{:.6}", runtime_seconds));
}
