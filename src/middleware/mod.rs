//! Request tracking around a downstream handler.
//!
//! The [`RequestTracker`] wraps a downstream [`Handler`]: it decides
//! whether the request may run, times it, and hands a
//! [`RequestRecord`](crate::analytics::RequestRecord) to the analytics
//! aggregator and every registered detailed logger.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use request_tracker::core::{Context, Request, Response, Result};
//! use request_tracker::middleware::RequestTracker;
//! use request_tracker::runtime::TrackerRuntime;
//!
//! let runtime = Arc::new(TrackerRuntime::builder().build().unwrap());
//! let tracker = RequestTracker::new(runtime);
//!
//! let downstream = |_req: Request, _ctx: &mut Context| -> Result<Response> {
//!     Ok(Response::ok("hello"))
//! };
//!
//! let req = Request::from(http::Request::get("/").body(bytes::Bytes::new()).unwrap());
//! let mut ctx = Context::new("203.0.113.9".parse().unwrap());
//! let res = tracker.handle(req, &mut ctx, &downstream).unwrap();
//! assert_eq!(res.status(), http::StatusCode::OK);
//! ```

pub mod access_log;
mod tracker;

pub use access_log::AccessLogger;
pub use tracker::{parse_request_start, RequestTracker};

use crate::core::{Context, Error, Request, Response};

/// The application behind the tracker.
///
/// Runs synchronously; the server calls the tracker on a blocking worker.
/// The handler may flag the request as an asset with
/// [`Context::mark_asset_path`] and report backend calls with
/// [`Context::record_backend_call`].
pub trait Handler: Send + Sync {
    fn call(&self, req: Request, ctx: &mut Context) -> Result<Response, Error>;
}

impl<F> Handler for F
where
    F: Fn(Request, &mut Context) -> Result<Response, Error> + Send + Sync,
{
    #[inline]
    fn call(&self, req: Request, ctx: &mut Context) -> Result<Response, Error> {
        self(req, ctx)
    }
}
