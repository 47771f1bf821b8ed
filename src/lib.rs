//! request_tracker - HTTP request tracking and rate limiting middleware.
//!
//! Every request passing through [`RequestTracker`] is identified (logged-in
//! user or client IP), checked against per-10-second, per-minute and asset
//! limits, handed to the downstream [`Handler`](middleware::Handler) and
//! finally recorded: buffered daily counters, detailed loggers and
//! prometheus metrics.
//!
//! # Features
//!
//! - **Rate limiting**: fixed-window limits per user id or per IP, with
//!   `warn`, `block` and `warn+block` modes
//! - **Identity**: signed auth cookie verification with trust levels
//! - **Analytics**: page view classification and buffered daily counters
//! - **Hooks**: pluggable IP skippers and detailed request loggers
//! - **Server**: hyper based HTTP/1.1 and HTTP/2 front with an internal
//!   `/health`, `/metrics` and `/counters` endpoint
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use request_tracker::core::{Context, Error, Request, Response};
//! use request_tracker::{RequestTracker, TrackerRuntime};
//!
//! let runtime = Arc::new(TrackerRuntime::builder().build().unwrap());
//! let tracker = RequestTracker::new(runtime);
//!
//! let req = Request::new(
//!     http::Method::GET,
//!     http::Uri::from_static("/latest"),
//!     http::HeaderMap::new(),
//!     bytes::Bytes::new(),
//! );
//! let mut ctx = Context::new("10.0.0.1".parse().unwrap());
//! let res = tracker
//!     .handle(req, &mut ctx, &|_req: Request, _ctx: &mut Context| -> Result<Response, Error> {
//!         Ok(Response::ok("hello"))
//!     })
//!     .unwrap();
//! assert_eq!(res.status(), http::StatusCode::OK);
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod analytics;
pub mod clock;
pub mod config;
pub mod core;
pub mod hooks;
pub mod identity;
pub mod logging;
pub mod middleware;
pub mod observability;
pub mod rate_limit;
pub mod runtime;
pub mod server;

// Re-exports for convenience
pub use config::Config;
pub use middleware::RequestTracker;
pub use runtime::TrackerRuntime;
pub use server::Server;
