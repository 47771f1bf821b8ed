//! Prometheus metrics for request_tracker.
//!
//! Request rate and latency by status class, plus the tracker's own
//! activity: rate limit warnings and rejections, counter flushes and hook
//! failures.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::rate_limit::LimitErrorCode;

/// Prometheus registry with all tracker metrics.
pub struct Metrics {
    registry: Registry,

    /// Tracked requests by status class (2xx, 3xx, ...).
    pub http_requests_total: IntCounterVec,

    /// Wall-clock time spent in the tracker and downstream.
    pub http_request_duration_seconds: Histogram,

    /// Time between the load balancer and the tracker.
    pub queue_seconds: Histogram,

    /// Requests refused with 429, by error code.
    pub rate_limit_rejections_total: IntCounterVec,

    /// Exceeded limits that were logged, by error code.
    pub rate_limit_warnings_total: IntCounterVec,

    /// Aggregator flushes.
    pub aggregator_flushes_total: IntCounter,

    /// Failed or panicked hooks, by hook kind.
    pub hook_failures_total: IntCounterVec,
}

impl Metrics {
    /// Create a new registry with all metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let latency_buckets = vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ];

        let http_requests_total = IntCounterVec::new(
            Opts::new("request_tracker_http_requests_total", "Total tracked HTTP requests"),
            &["status_class"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "request_tracker_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(latency_buckets.clone()),
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let queue_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "request_tracker_queue_seconds",
                "Time spent queued before reaching the tracker",
            )
            .buckets(latency_buckets),
        )?;
        registry.register(Box::new(queue_seconds.clone()))?;

        let rate_limit_rejections_total = IntCounterVec::new(
            Opts::new(
                "request_tracker_rate_limit_rejections_total",
                "Requests rejected by the rate limiter",
            ),
            &["code"],
        )?;
        registry.register(Box::new(rate_limit_rejections_total.clone()))?;

        let rate_limit_warnings_total = IntCounterVec::new(
            Opts::new(
                "request_tracker_rate_limit_warnings_total",
                "Rate limit warnings logged",
            ),
            &["code"],
        )?;
        registry.register(Box::new(rate_limit_warnings_total.clone()))?;

        let aggregator_flushes_total = IntCounter::new(
            "request_tracker_aggregator_flushes_total",
            "Request counter flushes",
        )?;
        registry.register(Box::new(aggregator_flushes_total.clone()))?;

        let hook_failures_total = IntCounterVec::new(
            Opts::new(
                "request_tracker_hook_failures_total",
                "Hooks that returned an error or panicked",
            ),
            &["hook"],
        )?;
        registry.register(Box::new(hook_failures_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            queue_seconds,
            rate_limit_rejections_total,
            rate_limit_warnings_total,
            aggregator_flushes_total,
            hook_failures_total,
        })
    }

    /// Record one completed request.
    pub fn record_request(&self, status: u16, duration_secs: f64, queue_secs: Option<f64>) {
        self.http_requests_total
            .with_label_values(&[status_class(status)])
            .inc();
        self.http_request_duration_seconds.observe(duration_secs);
        if let Some(q) = queue_secs {
            self.queue_seconds.observe(q);
        }
    }

    pub fn record_rate_limit(&self, code: LimitErrorCode, rejected: bool, warned: bool) {
        if rejected {
            self.rate_limit_rejections_total
                .with_label_values(&[code.as_str()])
                .inc();
        }
        if warned {
            self.rate_limit_warnings_total
                .with_label_values(&[code.as_str()])
                .inc();
        }
    }

    pub fn record_hook_failures(&self, hook: &str, failures: usize) {
        if failures > 0 {
            self.hook_failures_total
                .with_label_values(&[hook])
                .inc_by(failures as u64);
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Get the Prometheus registry (for custom metrics).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// "2xx" style label for a status code.
fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}
