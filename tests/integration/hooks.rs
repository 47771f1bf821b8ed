//! Detailed loggers and performance headers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use http::StatusCode;

use request_tracker::analytics::RequestRecord;
use request_tracker::hooks::HookError;
use request_tracker::rate_limit::RateLimitPolicy;

use crate::helpers::*;

const IP: &str = "1.2.3.4";

#[test]
fn test_loggers_called_once_per_request() {
    let h = Harness::new(RateLimitPolicy::default().with_10s_limit(Some(1)));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handle = h
        .runtime()
        .register_detailed_logger(move |_: &RequestRecord| -> Result<(), HookError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    h.send(get("/", &[]), IP, &html_page);
    h.send(get("/", &[]), IP, &html_page);
    h.send(get("/", &[]), IP, &html_page);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert!(h.runtime().unregister_detailed_logger(handle));
    assert!(!h.runtime().unregister_detailed_logger(handle));
    h.send(get("/", &[]), IP, &html_page);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_failing_logger_does_not_stop_others() {
    let h = Harness::new(RateLimitPolicy::disabled());
    h.runtime()
        .register_detailed_logger(|_: &RequestRecord| -> Result<(), HookError> {
            Err(HookError::new("sink unavailable"))
        });
    let (records, _) = h.capture_records();

    let res = h.send(get("/", &[]), IP, &html_page);
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(records.lock().unwrap().len(), 1);
    assert_eq!(
        h.runtime()
            .metrics()
            .hook_failures_total
            .with_label_values(&["detailed_logger"])
            .get(),
        1
    );
}

#[test]
fn test_record_contents() {
    let h = Harness::new(RateLimitPolicy::disabled());
    let (records, _) = h.capture_records();
    let start = format!("t={}", NOW - 0.5);

    h.send(
        get("/t/topic/1?page=2", &[("x-request-start", &start), ("user-agent", DESKTOP_UA)]),
        IP,
        &busy_page,
    );

    let records = records.lock().unwrap();
    let record = &records[0];
    assert_eq!(record.status, 200);
    assert_eq!(record.method, "GET");
    assert_eq!(record.path, "/t/topic/1");
    assert_eq!(record.client_ip.to_string(), IP);
    assert_eq!(record.timestamp, NOW);
    assert_eq!(record.queue_seconds, Some(0.5));
    assert_eq!(record.timing.sql.calls, 2);
    assert_eq!(record.timing.redis.calls, 2);
    assert!(record.classification.is_page_view);
    assert_eq!(record.rate_limited, None);
    assert_eq!(record.user_agent, None);
}

#[test]
fn test_detailed_performance_headers() {
    let h = Harness::new(RateLimitPolicy::disabled());
    h.runtime().set_performance_headers(true);
    let start = format!("t={}", NOW - 60.0);

    let res = h.send(get("/", &[("x-request-start", &start)]), IP, &busy_page);

    assert_header(&res, "x-queue-time", "60.000000");
    assert_header(&res, "x-sql-calls", "2");
    assert_header(&res, "x-sql-time", "0.010000");
    assert_header(&res, "x-redis-calls", "2");
    assert_header(&res, "x-redis-time", "0.002000");
    assert!(res.header("x-runtime").is_some());
}

#[test]
fn test_queue_time_from_milliseconds_header() {
    let h = Harness::new(RateLimitPolicy::disabled());
    h.runtime().set_performance_headers(true);
    let start = format!("{}", (NOW - 2.0) as u64 * 1000);

    let res = h.send(get("/", &[("x-request-start", &start)]), IP, &html_page);
    assert_header(&res, "x-queue-time", "2.000000");
}

#[test]
fn test_rejected_requests_get_no_performance_headers() {
    let h = Harness::new(RateLimitPolicy::default().with_10s_limit(Some(1)));
    h.runtime().set_performance_headers(true);

    h.send(get("/", &[]), IP, &html_page);
    let res = h.send(get("/", &[]), IP, &html_page);
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.header("x-runtime").is_none());
}
