//! Registries for callbacks plugged in at runtime.
//!
//! Two kinds of hooks exist: IP skippers, consulted before any rate limit
//! counter is touched, and detailed request loggers, called once per
//! completed request. Registration returns a [`HookHandle`] used to
//! unregister. Registries can change while requests are in flight; every
//! caller iterates over a snapshot.

use std::net::IpAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::analytics::RequestRecord;

/// Predicate that exempts an IP from rate limiting when it returns true.
pub type IpSkipper = dyn Fn(IpAddr) -> bool + Send + Sync;

/// Error returned by a hook.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Receives one record per completed request.
pub trait DetailedRequestLogger: Send + Sync {
    fn log(&self, record: &RequestRecord) -> Result<(), HookError>;
}

impl<F> DetailedRequestLogger for F
where
    F: Fn(&RequestRecord) -> Result<(), HookError> + Send + Sync,
{
    fn log(&self, record: &RequestRecord) -> Result<(), HookError> {
        self(record)
    }
}

/// Opaque registration handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(u64);

/// Thread-safe list of registered hooks.
pub struct HookRegistry<T: ?Sized> {
    entries: RwLock<Vec<(HookHandle, Arc<T>)>>,
    next_id: AtomicU64,
}

impl<T: ?Sized> HookRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self, hook: Arc<T>) -> HookHandle {
        let handle = HookHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((handle, hook));
        handle
    }

    /// Returns false if the handle was not registered.
    pub fn unregister(&self, handle: HookHandle) -> bool {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(h, _)| *h != handle);
        entries.len() != before
    }

    /// Current hooks, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<T: ?Sized> Default for HookRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry<IpSkipper> {
    /// True if any registered skipper exempts `ip`.
    ///
    /// A panicking skipper counts as "not skipped".
    pub fn skips(&self, ip: IpAddr) -> bool {
        self.snapshot().iter().any(|skipper| {
            match catch_unwind(AssertUnwindSafe(|| skipper(ip))) {
                Ok(skip) => skip,
                Err(_) => {
                    tracing::warn!(ip = %ip, "IP skipper panicked");
                    false
                }
            }
        })
    }
}

impl HookRegistry<dyn DetailedRequestLogger> {
    /// Hand `record` to every logger. Returns how many failed.
    ///
    /// Failures and panics are logged and never reach the caller.
    pub fn dispatch(&self, record: &RequestRecord) -> usize {
        let mut failures = 0;
        for logger in self.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| logger.log(record))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!(error = %e, "Detailed request logger failed");
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!("Detailed request logger panicked");
                }
            }
        }
        failures
    }
}
