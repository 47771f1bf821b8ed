//! Internal HTTP server for health, metrics and counter endpoints.
//!
//! - `/health` - liveness with active connection count
//! - `/metrics` - prometheus text format
//! - `/counters` - committed request counters as JSON

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::body::Incoming as IncomingBody;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::core::Response;
use crate::runtime::TrackerRuntime;

/// Accept loop for the internal server. Runs until the listener fails.
pub async fn run_internal_server(
    addr: SocketAddr,
    runtime: Arc<TrackerRuntime>,
    active_connections: Arc<AtomicUsize>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        let runtime = Arc::clone(&runtime);
        let connections = Arc::clone(&active_connections);

        tokio::spawn(async move {
            let service = service_fn(move |req: hyper::Request<IncomingBody>| {
                let conns = connections.load(Ordering::Relaxed);
                let response = handle_internal_request(req.uri().path(), &runtime, conns);
                async move { Ok::<_, Infallible>(response) }
            });

            let io = TokioIo::new(stream);
            let _ = http1::Builder::new().serve_connection(io, service).await;
        });
    }
}

/// Route one internal request.
pub fn handle_internal_request(
    path: &str,
    runtime: &TrackerRuntime,
    active_connections: usize,
) -> hyper::Response<Full<Bytes>> {
    let response = match path {
        "/health" => {
            let body = serde_json::json!({
                "status": "ok",
                "timestamp": runtime.clock().now_secs(),
                "active_connections": active_connections,
                "rate_limiter": if runtime.rate_limiter_enabled() { "enabled" } else { "disabled" },
                "pending_counters": runtime.aggregator().pending(),
            });
            Response::builder().json().body(body.to_string()).build()
        }
        "/metrics" => Response::builder()
            .content_type("text/plain; version=0.0.4; charset=utf-8")
            .body(runtime.metrics().export())
            .build(),
        "/counters" => {
            let snapshot = runtime.aggregator().backend().snapshot();
            let body = serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_string());
            Response::builder().json().body(body).build()
        }
        _ => Response::not_found(),
    };

    http::Response::<Bytes>::from(response).map(Full::new)
}
