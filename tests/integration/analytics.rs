//! Request counters end to end

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode};

use request_tracker::analytics::{CacheOutcome, RequestCounter, RequestRecord};
use request_tracker::core::{Context, Error, Request, Response};
use request_tracker::hooks::HookError;
use request_tracker::rate_limit::RateLimitPolicy;

use crate::helpers::*;

const IP: &str = "1.2.3.4";

fn committed(h: &Harness, counter: RequestCounter) -> u64 {
    h.runtime().aggregator().committed(counter, DAY)
}

fn status(code: u16) -> impl Fn(Request, &mut Context) -> Result<Response, Error> {
    move |_req: Request, _ctx: &mut Context| -> Result<Response, Error> {
        Ok(Response::empty(StatusCode::from_u16(code).unwrap()))
    }
}

#[test]
fn test_counts_are_buffered_until_flush() {
    let h = Harness::new(RateLimitPolicy::disabled());
    h.send(get("/", &[("user-agent", DESKTOP_UA)]), IP, &html_page);

    assert!(h.runtime().aggregator().pending() > 0);
    assert_eq!(committed(&h, RequestCounter::HttpTotal), 0);

    assert!(h.runtime().flush() > 0);
    assert_eq!(h.runtime().aggregator().pending(), 0);
    assert_eq!(committed(&h, RequestCounter::HttpTotal), 1);
    assert_eq!(committed(&h, RequestCounter::Http2xx), 1);
    assert_eq!(committed(&h, RequestCounter::PageViewAnon), 1);

    // Nothing new recorded, nothing written.
    assert_eq!(h.runtime().flush(), 0);
    assert_eq!(committed(&h, RequestCounter::HttpTotal), 1);
}

#[test]
fn test_status_classes() {
    let h = Harness::new(RateLimitPolicy::disabled());
    h.send(get("/a", &[]), IP, &status(204));
    h.send(get("/b", &[]), IP, &status(302));
    h.send(get("/c", &[]), IP, &status(404));
    h.send(get("/d", &[]), IP, &status(503));
    h.send(get("/message-bus/poll", &[]), IP, &status(200));

    let failing = |_req: Request, _ctx: &mut Context| -> Result<Response, Error> {
        Err(Error::Handler("db down".into()))
    };
    let mut ctx = Context::new(IP.parse().unwrap());
    assert!(h.tracker.handle(get("/e", &[]), &mut ctx, &failing).is_err());

    h.runtime().flush();
    assert_eq!(committed(&h, RequestCounter::HttpTotal), 6);
    assert_eq!(committed(&h, RequestCounter::Http2xx), 1);
    assert_eq!(committed(&h, RequestCounter::Http3xx), 1);
    assert_eq!(committed(&h, RequestCounter::Http4xx), 1);
    assert_eq!(committed(&h, RequestCounter::Http5xx), 2);
    assert_eq!(committed(&h, RequestCounter::HttpBackground), 1);
}

#[test]
fn test_page_view_kinds() {
    let h = Harness::new(RateLimitPolicy::disabled());
    let cookie = auth_cookie(7, 1, NOW);

    h.send(get("/t/1", &[("user-agent", DESKTOP_UA)]), IP, &html_page);
    h.send(get("/t/1", &[("user-agent", MOBILE_UA)]), IP, &html_page);
    h.send(
        get("/t/1", &[("user-agent", DESKTOP_UA), ("cookie", &cookie)]),
        IP,
        &html_page,
    );
    h.send(
        get("/t/1", &[("user-agent", MOBILE_UA), ("cookie", &cookie)]),
        IP,
        &html_page,
    );
    h.send(get("/t/1", &[("user-agent", CRAWLER_UA)]), IP, &html_page);
    h.send(get("/t/1", &[("user-agent", CRAWLER_UA)]), IP, &html_page);

    h.runtime().flush();
    assert_eq!(committed(&h, RequestCounter::PageViewAnon), 2);
    assert_eq!(committed(&h, RequestCounter::PageViewAnonMobile), 1);
    assert_eq!(committed(&h, RequestCounter::PageViewLoggedIn), 2);
    assert_eq!(committed(&h, RequestCounter::PageViewLoggedInMobile), 1);
    assert_eq!(committed(&h, RequestCounter::PageViewCrawler), 2);
    assert_eq!(
        h.runtime().aggregator().crawler_requests(CRAWLER_UA, DAY),
        2
    );
}

#[test]
fn test_not_page_views() {
    let h = Harness::new(RateLimitPolicy::disabled());
    let ua = [("user-agent", DESKTOP_UA)];

    // Wrong method, wrong content type, error status, opted out.
    h.send(request(Method::POST, "/t/1", &ua), IP, &html_page);
    h.send(get("/t/1.json", &ua), IP, &status(200));
    h.send(get("/missing", &ua), IP, &status(404));
    h.send(
        get("/t/1", &[("user-agent", DESKTOP_UA), ("discourse-track-view", "false")]),
        IP,
        &html_page,
    );
    // HTML served for an asset request.
    h.send_asset(get("/assets/x", &ua), IP, &html_page);

    h.runtime().flush();
    assert_eq!(committed(&h, RequestCounter::HttpTotal), 5);
    assert_eq!(committed(&h, RequestCounter::PageViewAnon), 0);
}

#[test]
fn test_login_required_drops_anonymous_views() {
    let h = Harness::with_login_required(RateLimitPolicy::disabled(), true);
    let cookie = auth_cookie(7, 1, NOW);

    h.send(get("/", &[("user-agent", DESKTOP_UA)]), IP, &html_page);
    h.send(
        get("/", &[("user-agent", DESKTOP_UA), ("cookie", &cookie)]),
        IP,
        &html_page,
    );

    h.runtime().flush();
    assert_eq!(committed(&h, RequestCounter::PageViewAnon), 0);
    assert_eq!(committed(&h, RequestCounter::PageViewLoggedIn), 1);
    assert_eq!(committed(&h, RequestCounter::HttpTotal), 2);
}

#[test]
fn test_rejected_requests_are_counted() {
    let h = Harness::new(RateLimitPolicy::default().with_10s_limit(Some(1)));
    let (records, _) = h.capture_records();

    h.send(get("/", &[("user-agent", DESKTOP_UA)]), IP, &html_page);
    h.send(get("/", &[("user-agent", DESKTOP_UA)]), IP, &html_page);

    h.runtime().flush();
    assert_eq!(committed(&h, RequestCounter::HttpTotal), 2);
    assert_eq!(committed(&h, RequestCounter::Http4xx), 1);
    assert_eq!(committed(&h, RequestCounter::PageViewAnon), 1);

    let records = records.lock().unwrap();
    assert!(records[1].was_rejected());
    assert!(!records[1].classification.is_page_view);
}

#[test]
fn test_cache_header_reaches_record() {
    let h = Harness::new(RateLimitPolicy::disabled());
    let (records, _) = h.capture_records();
    let cached = |_req: Request, _ctx: &mut Context| -> Result<Response, Error> {
        Ok(Response::builder()
            .html()
            .header(CacheOutcome::HEADER, "true")
            .body("<p>cached</p>")
            .build())
    };

    h.send(get("/", &[("user-agent", DESKTOP_UA)]), IP, &cached);
    h.send(get("/", &[("user-agent", DESKTOP_UA)]), IP, &html_page);

    let records = records.lock().unwrap();
    assert_eq!(records[0].cache, Some(CacheOutcome::Hit));
    assert_eq!(records[1].cache, None);
}

#[test]
fn test_day_rollover_uses_request_time() {
    let h = Harness::new(RateLimitPolicy::disabled());
    h.send(get("/", &[]), IP, &status(200));
    h.clock.advance(std::time::Duration::from_secs(86_400));
    h.send(get("/", &[]), IP, &status(200));
    h.runtime().flush();

    let aggregator = h.runtime().aggregator();
    assert_eq!(aggregator.committed(RequestCounter::HttpTotal, DAY), 1);
    assert_eq!(aggregator.committed(RequestCounter::HttpTotal, DAY + 1), 1);
}

#[test]
fn test_rogue_user_agent_is_counted_as_crawler() {
    let h = Harness::new(RateLimitPolicy::disabled());
    let raw: &[u8] = b"Evil Googlebot String \xc3\x28";
    let req = Request::from(
        http::Request::get("/")
            .header("user-agent", HeaderValue::from_bytes(raw).unwrap())
            .body(Bytes::new())
            .unwrap(),
    );

    let res = h.send(req, IP, &html_page);
    assert_eq!(res.status(), StatusCode::OK);

    h.runtime().flush();
    let agent = String::from_utf8_lossy(raw);
    assert_eq!(h.runtime().aggregator().crawler_requests(&agent, DAY), 1);
    assert_eq!(committed(&h, RequestCounter::PageViewCrawler), 1);
}

#[test]
fn test_mobile_app_agent_counts_as_visit() {
    let h = Harness::new(RateLimitPolicy::disabled());
    let hub = "Mozilla/5.0 AppleWebKit/605.1.15 Mobile/15E148 DiscourseHub)";

    h.send(get("/t/1", &[("user-agent", hub)]), IP, &html_page);
    h.send(get("/t/1", &[("user-agent", CRAWLER_UA)]), IP, &html_page);

    h.runtime().flush();
    assert_eq!(committed(&h, RequestCounter::PageViewAnon), 1);
    assert_eq!(committed(&h, RequestCounter::PageViewAnonMobile), 1);
    assert_eq!(committed(&h, RequestCounter::PageViewCrawler), 1);
    assert_eq!(h.runtime().aggregator().crawler_requests(hub, DAY), 0);
}

#[test]
fn test_track_view_header_cannot_count_plain_text() {
    let h = Harness::new(RateLimitPolicy::disabled());
    let text = |_req: Request, _ctx: &mut Context| -> Result<Response, Error> {
        Ok(Response::builder().text().body("plain").build())
    };

    h.send(
        get("/t/1", &[("user-agent", DESKTOP_UA), ("discourse-track-view", "1")]),
        IP,
        &text,
    );
    h.send(
        get("/t/1", &[("user-agent", DESKTOP_UA), ("discourse-track-view", "1")]),
        IP,
        &html_page,
    );

    h.runtime().flush();
    assert_eq!(committed(&h, RequestCounter::HttpTotal), 2);
    assert_eq!(committed(&h, RequestCounter::PageViewAnon), 1);
}

#[test]
fn test_concurrent_requests_are_all_counted() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 51;

    let h = Harness::new(RateLimitPolicy::default().with_10s_limit(None).with_60s_limit(Some(50)));
    let logged = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&logged);
    h.runtime()
        .register_detailed_logger(move |_: &RequestRecord| -> Result<(), HookError> {
            sink.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

    let rejected = AtomicUsize::new(0);
    std::thread::scope(|s| {
        for t in 0..THREADS {
            let (h, rejected) = (&h, &rejected);
            s.spawn(move || {
                let ip = format!("1.2.3.{}", t + 1);
                for _ in 0..PER_THREAD {
                    let res = h.send(get("/", &[("user-agent", DESKTOP_UA)]), &ip, &html_page);
                    if res.status() == StatusCode::TOO_MANY_REQUESTS {
                        rejected.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }

        // Registries change while requests are in flight.
        s.spawn(|| {
            for _ in 0..100 {
                let handle = h.runtime().register_ip_skipper(|_ip| false);
                h.runtime().unregister_ip_skipper(handle);
            }
        });
    });

    let total = THREADS * PER_THREAD;
    assert_eq!(rejected.load(Ordering::Relaxed), THREADS);
    assert_eq!(logged.load(Ordering::Relaxed), total);

    h.runtime().flush();
    assert_eq!(committed(&h, RequestCounter::HttpTotal), total as u64);
    assert_eq!(committed(&h, RequestCounter::Http2xx), (total - THREADS) as u64);
    assert_eq!(committed(&h, RequestCounter::Http4xx), THREADS as u64);
    assert_eq!(committed(&h, RequestCounter::PageViewAnon), (total - THREADS) as u64);
}
