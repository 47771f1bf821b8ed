//! Core types for HTTP request/response handling.
//!
//! This module provides the fundamental types shared by the tracker, the
//! downstream handler and the server:
//!
//! - [`Request`] - HTTP request abstraction
//! - [`Response`] - HTTP response abstraction with builder pattern
//! - [`Context`] - Request context (asset flag, backend call counters)
//! - [`Error`] - Core error types
//!
//! # Example
//!
//! ```rust
//! use request_tracker::core::{Backend, Context, Request, Response};
//! use std::time::Duration;
//!
//! fn handle(req: Request, ctx: &mut Context) -> Response {
//!     if req.path().starts_with("/assets/") {
//!         ctx.mark_asset_path();
//!     }
//!     ctx.record_backend_call(Backend::Sql, Duration::from_millis(2));
//!     Response::builder().html().body("<h1>Hello</h1>").build()
//! }
//! ```

mod context;
mod error;
mod request;
mod response;
mod timing;

pub use context::{generate_request_id, Context};
pub use error::{Error, Result};
pub use request::Request;
pub use response::{Response, ResponseBuilder};
pub use timing::{Backend, BackendTiming, BackendTimings};
