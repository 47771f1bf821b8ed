//! Request context shared between the tracker and the downstream handler.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use super::timing::{Backend, BackendTimings};

/// Request-scoped state.
///
/// The server creates one per request. The downstream handler uses it to
/// flag asset requests and to report backend calls; the asset flag is an
/// in-process signal and never leaves as a header.
#[derive(Debug)]
pub struct Context {
    /// Socket peer address of the client.
    pub client_ip: IpAddr,
    /// Upstream `X-Request-Id` or a generated one.
    pub request_id: String,
    asset_path: bool,
    timings: BackendTimings,
}

impl Context {
    #[inline]
    pub fn new(client_ip: IpAddr) -> Self {
        Self::with_request_id(client_ip, generate_request_id())
    }

    #[inline]
    pub fn with_request_id(client_ip: IpAddr, request_id: impl Into<String>) -> Self {
        Self {
            client_ip,
            request_id: request_id.into(),
            asset_path: false,
            timings: BackendTimings::default(),
        }
    }

    /// Flag this request as a static asset request.
    ///
    /// Asset requests are counted against the asset rate limit instead of
    /// the per-10-second and per-minute request limits.
    #[inline]
    pub fn mark_asset_path(&mut self) {
        self.asset_path = true;
    }

    #[inline]
    pub fn is_asset_path(&self) -> bool {
        self.asset_path
    }

    /// Report one backend call made while handling this request.
    #[inline]
    pub fn record_backend_call(&mut self, backend: Backend, elapsed: Duration) {
        self.timings.record(backend, elapsed);
    }

    /// Run `f` and report its duration as one call to `backend`.
    pub fn time_backend_call<T>(&mut self, backend: Backend, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.timings.record(backend, start.elapsed());
        out
    }

    #[inline]
    pub fn backend_timings(&self) -> &BackendTimings {
        &self.timings
    }
}

/// 16 hex chars taken from a v4 uuid.
#[inline]
pub fn generate_request_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}
