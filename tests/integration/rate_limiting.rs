//! Rate limiting through the tracker

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use http::StatusCode;

use request_tracker::core::{Context, Error, Request, Response};
use request_tracker::identity::{CookieSigner, Identity};
use request_tracker::rate_limit::{LimitErrorCode, RateLimitMode, RateLimitPolicy, StaticExemptList};

use crate::helpers::*;

const IP: &str = "1.2.3.4";

fn policy() -> RateLimitPolicy {
    RateLimitPolicy::default()
}

#[test]
fn test_ten_second_limit_rejects_and_resets() {
    let h = Harness::new(policy().with_10s_limit(Some(2)).with_60s_limit(Some(100)));

    assert_eq!(h.send(get("/", &[]), IP, &html_page).status(), StatusCode::OK);
    assert_eq!(h.send(get("/", &[]), IP, &html_page).status(), StatusCode::OK);

    let res = h.send(get("/", &[]), IP, &html_page);
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_header(&res, "retry-after", "10");
    assert_header(&res, "discourse-rate-limit-error-code", "ip_10_secs_limit");
    assert!(String::from_utf8_lossy(res.body()).contains("Error code: ip_10_secs_limit."));

    // Other clients are unaffected.
    assert_eq!(h.send(get("/", &[]), "5.6.7.8", &html_page).status(), StatusCode::OK);

    h.clock.advance(Duration::from_secs(10));
    assert_eq!(h.send(get("/", &[]), IP, &html_page).status(), StatusCode::OK);
}

#[test]
fn test_sixty_second_limit_retry_after_counts_down() {
    let h = Harness::new(policy().with_10s_limit(None).with_60s_limit(Some(1)));

    assert_eq!(h.send(get("/", &[]), IP, &html_page).status(), StatusCode::OK);

    h.clock.advance(Duration::from_secs(15));
    let res = h.send(get("/", &[]), IP, &html_page);
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_header(&res, "retry-after", "45");
    assert_header(&res, "discourse-rate-limit-error-code", "ip_60_secs_limit");
}

#[test]
fn test_asset_limit_applies_to_flagged_requests() {
    let h = Harness::new(policy().with_asset_limit(Some(3)));
    let asset = |_req: Request, _ctx: &mut Context| -> Result<Response, Error> {
        Ok(Response::builder().content_type("text/css").body("a{}").build())
    };

    for _ in 0..3 {
        let res = h.send_asset(get("/assets/app.css", &[]), IP, &asset);
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = h.send_asset(get("/assets/app.css", &[]), IP, &asset);
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_header(&res, "discourse-rate-limit-error-code", "ip_assets_10_secs_limit");

    // An exhausted asset budget also stops regular requests.
    let res = h.send(get("/latest", &[]), IP, &html_page);
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_header(&res, "retry-after", "10");
    assert_header(&res, "discourse-rate-limit-error-code", "ip_assets_10_secs_limit");
}

#[test]
fn test_assets_do_not_consume_request_budget() {
    let h = Harness::new(policy().with_10s_limit(Some(1)).with_asset_limit(Some(100)));
    let asset = |_req: Request, _ctx: &mut Context| -> Result<Response, Error> {
        Ok(Response::ok("asset"))
    };

    for _ in 0..10 {
        let res = h.send_asset(get("/assets/app.js", &[]), IP, &asset);
        assert_eq!(res.status(), StatusCode::OK);
    }
    assert_eq!(h.send(get("/", &[]), IP, &html_page).status(), StatusCode::OK);
}

#[test]
fn test_downstream_flagged_asset_moves_to_asset_counter() {
    let h = Harness::new(policy().with_10s_limit(Some(1)).with_asset_limit(Some(1)));
    let calls = AtomicUsize::new(0);
    let flags_asset = |_req: Request, ctx: &mut Context| -> Result<Response, Error> {
        calls.fetch_add(1, Ordering::SeqCst);
        ctx.mark_asset_path();
        Ok(Response::ok("asset"))
    };

    let first = h.send(get("/uploads/a.png", &[]), IP, &flags_asset);
    assert_eq!(first.status(), StatusCode::OK);

    // The first request was moved off the request counters...
    let second = h.send(get("/uploads/b.png", &[]), IP, &flags_asset);
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    // ...and onto the asset counter, which is now full.
    assert_header(&second, "discourse-rate-limit-error-code", "ip_assets_10_secs_limit");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_trusted_user_limited_by_id() {
    let mut policy = policy().with_10s_limit(None).with_60s_limit(Some(1));
    policy.skip_trust_tier = 3;
    let h = Harness::new(policy);
    let cookie = auth_cookie(42, 3, NOW - 60.0);

    let res = h.send(get("/", &[("cookie", &cookie)]), IP, &html_page);
    assert_eq!(res.status(), StatusCode::OK);

    // Same user from another IP shares the budget.
    let res = h.send(get("/", &[("cookie", &cookie)]), "9.9.9.9", &html_page);
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_header(&res, "discourse-rate-limit-error-code", "id_60_secs_limit");
    assert_header(&res, "retry-after", "60");

    // The IP budget itself is untouched.
    assert_eq!(h.send(get("/", &[]), "9.9.9.9", &html_page).status(), StatusCode::OK);
}

#[test]
fn test_low_trust_user_limited_by_ip() {
    let mut policy = policy().with_10s_limit(None).with_60s_limit(Some(1));
    policy.skip_trust_tier = 3;
    let h = Harness::new(policy);
    let cookie = auth_cookie(42, 2, NOW);

    assert_eq!(
        h.send(get("/", &[("cookie", &cookie)]), IP, &html_page).status(),
        StatusCode::OK
    );
    let res = h.send(get("/", &[("cookie", &cookie)]), IP, &html_page);
    assert_header(&res, "discourse-rate-limit-error-code", "ip_60_secs_limit");
}

#[test]
fn test_expired_cookie_falls_back_to_ip() {
    let h = Harness::new(policy().with_10s_limit(None).with_60s_limit(Some(1)));
    let cookie = auth_cookie(42, 4, NOW - 12.0 * 60.0);

    assert_eq!(
        h.send(get("/", &[("cookie", &cookie)]), IP, &html_page).status(),
        StatusCode::OK
    );
    let res = h.send(get("/", &[("cookie", &cookie)]), IP, &html_page);
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_header(&res, "discourse-rate-limit-error-code", "ip_60_secs_limit");
}

#[test]
fn test_forged_cookie_falls_back_to_ip() {
    let h = Harness::new(policy().with_10s_limit(None).with_60s_limit(Some(1)));
    let token = CookieSigner::new(b"some-other-secret")
        .issue(&Identity {
            user_id: 42,
            trust_level: 4,
            issued_at: NOW as i64,
        })
        .unwrap();
    let cookie = format!("_t={}", token);

    assert_eq!(
        h.send(get("/", &[("cookie", &cookie)]), IP, &html_page).status(),
        StatusCode::OK
    );
    let res = h.send(get("/", &[("cookie", &cookie)]), IP, &html_page);
    assert_header(&res, "discourse-rate-limit-error-code", "ip_60_secs_limit");
}

#[test]
fn test_cookie_with_swapped_characters_falls_back_to_ip() {
    let h = Harness::new(policy().with_10s_limit(None).with_60s_limit(Some(1)));
    let valid = auth_cookie(42, 4, NOW);

    // Two distinct characters of the signed payload trade places.
    let mut bytes = valid.clone().into_bytes();
    let dot = bytes.iter().position(|b| *b == b'.').unwrap();
    let (i, j) = (dot + 2, dot + 5);
    assert_ne!(bytes[i], bytes[j]);
    bytes.swap(i, j);
    let tampered = String::from_utf8(bytes).unwrap();

    // The untouched cookie is limited per identity, from any address.
    assert_eq!(
        h.send(get("/", &[("cookie", &valid)]), "5.6.7.8", &html_page).status(),
        StatusCode::OK
    );

    assert_eq!(
        h.send(get("/", &[("cookie", &tampered)]), IP, &html_page).status(),
        StatusCode::OK
    );
    let res = h.send(get("/", &[("cookie", &tampered)]), IP, &html_page);
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_header(&res, "discourse-rate-limit-error-code", "ip_60_secs_limit");
}

#[test]
fn test_private_ips_exempt_unless_configured() {
    let h = Harness::new(policy().with_10s_limit(Some(1)));
    for _ in 0..5 {
        assert_eq!(h.send(get("/", &[]), "10.0.0.1", &html_page).status(), StatusCode::OK);
    }

    h.runtime().update_policy(|p| p.rate_limit_private_ips = true);
    assert_eq!(h.send(get("/", &[]), "10.0.0.1", &html_page).status(), StatusCode::OK);
    assert_eq!(
        h.send(get("/", &[]), "10.0.0.1", &html_page).status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[test]
fn test_static_exempt_list() {
    let mut policy = policy().with_10s_limit(Some(1));
    policy.static_exempt = StaticExemptList::parse("1.2.3.0/24 8.8.8.8");
    let h = Harness::new(policy);

    for _ in 0..3 {
        assert_eq!(h.send(get("/", &[]), "1.2.3.200", &html_page).status(), StatusCode::OK);
        assert_eq!(h.send(get("/", &[]), "8.8.8.8", &html_page).status(), StatusCode::OK);
    }
    assert_eq!(h.send(get("/", &[]), "1.2.4.1", &html_page).status(), StatusCode::OK);
    assert_eq!(
        h.send(get("/", &[]), "1.2.4.1", &html_page).status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[test]
fn test_registered_ip_skipper() {
    let h = Harness::new(policy().with_10s_limit(Some(1)));
    let handle = h
        .runtime()
        .register_ip_skipper(|ip| ip.to_string() == IP);

    for _ in 0..3 {
        assert_eq!(h.send(get("/", &[]), IP, &html_page).status(), StatusCode::OK);
    }

    assert!(h.runtime().unregister_ip_skipper(handle));
    assert_eq!(h.send(get("/", &[]), IP, &html_page).status(), StatusCode::OK);
    assert_eq!(
        h.send(get("/", &[]), IP, &html_page).status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[test]
fn test_warn_mode_admits_and_logs() {
    let h = Harness::new(policy().with_mode(RateLimitMode::Warn).with_10s_limit(Some(1)));
    let (records, _) = h.capture_records();

    let lines = capture_logs(|| {
        assert_eq!(h.send(get("/", &[]), IP, &html_page).status(), StatusCode::OK);
        let res = h.send(get("/", &[]), IP, &html_page);
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.header("retry-after").is_none());
    });

    let warnings: Vec<_> = lines.iter().filter(|l| l["level"] == "warn").collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0]["msg"]
        .as_str()
        .unwrap()
        .contains("rate limit exceeded"));
    assert_eq!(warnings[0]["data"]["ip"], IP);

    let records = records.lock().unwrap();
    assert_eq!(records[0].rate_limited, None);
    assert_eq!(records[1].rate_limited, Some(LimitErrorCode::Ip10Secs));
    assert_eq!(records[1].status, 200);

    let metrics = h.runtime().metrics();
    assert_eq!(
        metrics
            .rate_limit_warnings_total
            .with_label_values(&["ip_10_secs_limit"])
            .get(),
        1
    );
    assert_eq!(
        metrics
            .rate_limit_rejections_total
            .with_label_values(&["ip_10_secs_limit"])
            .get(),
        0
    );
}

#[test]
fn test_warn_and_block_logs_and_rejects() {
    let h = Harness::new(
        policy()
            .with_mode(RateLimitMode::WarnAndBlock)
            .with_10s_limit(Some(1)),
    );

    let lines = capture_logs(|| {
        h.send(get("/", &[]), IP, &html_page);
        let res = h.send(get("/", &[]), IP, &html_page);
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    });

    assert_eq!(lines.iter().filter(|l| l["level"] == "warn").count(), 1);
}

#[test]
fn test_mode_none_never_limits() {
    let h = Harness::new(policy().with_mode(RateLimitMode::None).with_10s_limit(Some(1)));
    for _ in 0..5 {
        assert_eq!(h.send(get("/", &[]), IP, &html_page).status(), StatusCode::OK);
    }
}

#[test]
fn test_disabled_limiter_and_clear() {
    let h = Harness::new(policy().with_10s_limit(Some(1)));
    h.send(get("/", &[]), IP, &html_page);
    assert_eq!(
        h.send(get("/", &[]), IP, &html_page).status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    h.runtime().disable_rate_limiter();
    assert_eq!(h.send(get("/", &[]), IP, &html_page).status(), StatusCode::OK);

    h.runtime().enable_rate_limiter();
    h.runtime().clear_rate_limits();

    // A cleared store replays the same sequence.
    assert_eq!(h.send(get("/", &[]), IP, &html_page).status(), StatusCode::OK);
    assert_eq!(
        h.send(get("/", &[]), IP, &html_page).status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[test]
fn test_policy_change_applies_to_next_request() {
    let h = Harness::new(policy().with_10s_limit(Some(1)));
    h.send(get("/", &[]), IP, &html_page);
    assert_eq!(
        h.send(get("/", &[]), IP, &html_page).status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    h.runtime().update_policy(|p| p.per_10s_limit = Some(10));
    assert_eq!(h.send(get("/", &[]), IP, &html_page).status(), StatusCode::OK);
}

/// Run `f` with the JSON formatter capturing every event.
fn capture_logs(f: impl FnOnce()) -> Vec<serde_json::Value> {
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Buffer {
        type Writer = Buffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    let buffer = Buffer::default();
    let subscriber = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .event_format(request_tracker::logging::JsonFormatter::new("test"))
            .with_writer(buffer.clone()),
    );
    tracing::subscriber::with_default(subscriber, f);

    let bytes = buffer.0.lock().unwrap().clone();
    String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}
