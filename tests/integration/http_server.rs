//! Tests against a live server on 127.0.0.1

use std::sync::Arc;

use reqwest::StatusCode;

use request_tracker::rate_limit::RateLimitPolicy;
use request_tracker::server::DemoApp;
use request_tracker::TrackerRuntime;

use crate::helpers::*;

fn runtime(policy: RateLimitPolicy) -> Arc<TrackerRuntime> {
    Arc::new(
        TrackerRuntime::builder()
            .policy(policy)
            .build()
            .expect("runtime"),
    )
}

/// Loopback clients are private; opt them in to rate limiting.
fn loopback_policy() -> RateLimitPolicy {
    let mut policy = RateLimitPolicy::default().with_10s_limit(Some(2));
    policy.rate_limit_private_ips = true;
    policy
}

#[tokio::test(flavor = "multi_thread")]
async fn test_serves_downstream_pages() {
    let server = TestServer::start(runtime(RateLimitPolicy::disabled()), DemoApp::new()).await;

    let resp = server.get("/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    assert!(resp.text().await.unwrap().contains("It works"));

    let resp = server.get("/srv/status").await;
    assert_eq!(resp.text().await.unwrap(), "ok");

    let resp = server.get("/does-not-exist").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_id_is_echoed_or_generated() {
    let server = TestServer::start(runtime(RateLimitPolicy::disabled()), DemoApp::new()).await;

    let resp = server
        .get_with_headers("/srv/status", &[("x-request-id", "upstream-1234")])
        .await;
    assert_eq!(resp.headers().get("x-request-id").unwrap(), "upstream-1234");

    let resp = server.get("/srv/status").await;
    let generated = resp.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert!(!generated.is_empty());

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rate_limited_over_http() {
    let server = TestServer::start(runtime(loopback_policy()), DemoApp::new()).await;

    assert_eq!(server.get("/").await.status(), StatusCode::OK);
    assert_eq!(server.get("/").await.status(), StatusCode::OK);

    // The window may roll over between requests; keep going until limited.
    let mut limited = None;
    for _ in 0..5 {
        let resp = server.get("/").await;
        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            limited = Some(resp);
            break;
        }
    }

    let resp = limited.expect("never rate limited");
    assert_eq!(
        resp.headers()
            .get("discourse-rate-limit-error-code")
            .unwrap(),
        "ip_10_secs_limit"
    );
    let retry: u64 = resp
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=10).contains(&retry));
    assert!(resp.text().await.unwrap().contains("Error code: ip_10_secs_limit."));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_assets_use_asset_budget() {
    let server = TestServer::start(runtime(loopback_policy()), DemoApp::new()).await;

    for _ in 0..10 {
        let resp = server.get("/assets/app.css").await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_internal_endpoints() {
    let rt = runtime(RateLimitPolicy::disabled());
    let internal = free_local_addr();
    let server =
        TestServer::start_with_internal(Arc::clone(&rt), DemoApp::new(), Some(internal)).await;

    assert_eq!(server.get("/").await.status(), StatusCode::OK);
    rt.flush();

    let base = format!("http://{}", internal);
    let health: serde_json::Value = get_when_ready(&server.client, &format!("{}/health", base))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let counters: serde_json::Value = server
        .client
        .get(format!("{}/counters", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let total = counters
        .as_object()
        .unwrap()
        .iter()
        .find(|(k, _)| k.ends_with(":http_total"))
        .map(|(_, v)| v.as_u64().unwrap());
    assert_eq!(total, Some(1));

    let metrics = server
        .client
        .get(format!("{}/metrics", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("http_requests_total"));

    server.shutdown().await;
}
