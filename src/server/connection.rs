//! TCP connection handling.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming as IncomingBody;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use crate::core::{Context, Request, Response};
use crate::middleware::{Handler, RequestTracker};

/// Whether a connection error just means the client went away.
fn is_client_disconnect(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            return matches!(
                io.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::UnexpectedEof
            );
        }
        if let Some(h) = e.downcast_ref::<hyper::Error>() {
            if h.is_incomplete_message() || h.is_timeout() {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// State shared by every connection of one server.
pub struct ConnectionContext<H: Handler> {
    pub tracker: RequestTracker,
    pub downstream: Arc<H>,
    pub active_connections: Arc<AtomicUsize>,
}

impl<H: Handler + 'static> ConnectionContext<H> {
    /// Serve one TCP connection (HTTP/1.1 or h2c) until the client closes it.
    pub async fn handle_connection(self: Arc<Self>, stream: TcpStream, remote_addr: SocketAddr) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);

        let ctx = Arc::clone(&self);
        let service = service_fn(move |req| {
            let ctx = Arc::clone(&ctx);
            async move { ctx.handle_request(req, remote_addr).await }
        });

        let io = TokioIo::new(stream);
        if let Err(err) = auto::Builder::new(TokioExecutor::new())
            .http1()
            .timer(TokioTimer::new())
            .keep_alive(true)
            .http2()
            .max_concurrent_streams(250)
            .serve_connection(io, service)
            .await
        {
            if !is_client_disconnect(&*err) {
                debug!(client = %remote_addr, "Connection error: {:?}", err);
            }
        }

        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    async fn handle_request(
        &self,
        req: hyper::Request<IncomingBody>,
        remote_addr: SocketAddr,
    ) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!("Failed to read request body from {}: {}", remote_addr, e);
                let res = Response::builder()
                    .status(http::StatusCode::BAD_REQUEST)
                    .text()
                    .body("Bad Request")
                    .build();
                return Ok(to_hyper(res));
            }
        };

        let req = Request::from(hyper::Request::from_parts(parts, body));
        let mut ctx = match req.request_id() {
            Some(id) => Context::with_request_id(remote_addr.ip(), id),
            None => Context::new(remote_addr.ip()),
        };
        let request_id = ctx.request_id.clone();

        // The downstream is blocking; keep it off the I/O threads.
        let tracker = self.tracker.clone();
        let downstream = Arc::clone(&self.downstream);
        let result =
            tokio::task::spawn_blocking(move || tracker.handle(req, &mut ctx, &*downstream)).await;

        let mut response = match result {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => {
                warn!(request_id = %request_id, error = %e, "Request failed");
                Response::internal_error("Internal Server Error")
            }
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Request handler panicked");
                Response::internal_error("Internal Server Error")
            }
        };
        response.set_header("x-request-id", &request_id);

        Ok(to_hyper(response))
    }
}

#[inline]
fn to_hyper(response: Response) -> hyper::Response<Full<Bytes>> {
    http::Response::<Bytes>::from(response).map(Full::new)
}
