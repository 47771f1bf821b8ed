//! Fixed-window counters keyed by subject.
//!
//! A window is a bucket `floor(now / duration)`; the count starts over when
//! the bucket changes. There is no smoothing, so the time until the next
//! boundary is exactly what a rejected client is told to wait.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    TenSeconds,
    SixtySeconds,
}

impl Window {
    #[inline]
    pub const fn duration_secs(self) -> u64 {
        match self {
            Window::TenSeconds => 10,
            Window::SixtySeconds => 60,
        }
    }

    /// Stable id used in keys and logs.
    #[inline]
    pub const fn id(self) -> &'static str {
        match self {
            Window::TenSeconds => "10s",
            Window::SixtySeconds => "60s",
        }
    }

    /// Bucket index for `now`.
    #[inline]
    pub const fn bucket(self, now: u64) -> u64 {
        now / self.duration_secs()
    }
}

/// Which family of counters a key belongs to.
///
/// Asset requests and ordinary requests from one subject are counted
/// separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterScope {
    Requests,
    Assets,
}

/// Identifies one counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub scope: CounterScope,
    pub subject: String,
    pub window: Window,
}

impl CounterKey {
    pub fn new(scope: CounterScope, subject: impl Into<String>, window: Window) -> Self {
        Self {
            scope,
            subject: subject.into(),
            window,
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = match self.scope {
            CounterScope::Requests => "global_limit",
            CounterScope::Assets => "global_limit_assets",
        };
        write!(f, "{}_{}_{}", scope, self.window.id(), self.subject)
    }
}

/// Shared counter backend.
///
/// Implementations must make `increment` a single atomic read-modify-write
/// per key so concurrent workers never lose updates. `now` is whole unix
/// seconds.
pub trait CounterStore: Send + Sync {
    /// Count one event and return the count in the current bucket.
    fn increment(&self, key: &CounterKey, now: u64) -> u64;

    /// Current count without side effects. 0 once the bucket has passed.
    fn count(&self, key: &CounterKey, now: u64) -> u64;

    /// Undo one increment in the current bucket, saturating at zero.
    fn rollback(&self, key: &CounterKey, now: u64);

    /// Drop every counter.
    fn reset_all(&self);
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    index: u64,
    count: u64,
}

/// How many increments between sweeps of expired buckets.
const SWEEP_EVERY: u64 = 1024;

/// In-process counter store shared by every worker.
pub struct MemoryCounterStore {
    counters: RwLock<HashMap<CounterKey, Bucket>>,
    ops: AtomicU64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            ops: AtomicU64::new(0),
        }
    }

    /// Number of live keys (expired ones included until swept).
    pub fn len(&self) -> usize {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove buckets that ended before `now`. Returns how many were removed.
    pub fn sweep(&self, now: u64) -> usize {
        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = counters.len();
        counters.retain(|key, bucket| bucket.index == key.window.bucket(now));
        before - counters.len()
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(&self, key: &CounterKey, now: u64) -> u64 {
        let index = key.window.bucket(now);
        let count = {
            let mut counters = self
                .counters
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let bucket = counters
                .entry(key.clone())
                .or_insert(Bucket { index, count: 0 });
            if bucket.index != index {
                bucket.index = index;
                bucket.count = 0;
            }
            bucket.count += 1;
            bucket.count
        };

        if self.ops.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            let removed = self.sweep(now);
            if removed > 0 {
                tracing::debug!(removed, "swept expired rate limit buckets");
            }
        }

        count
    }

    fn count(&self, key: &CounterKey, now: u64) -> u64 {
        let counters = self
            .counters
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match counters.get(key) {
            Some(bucket) if bucket.index == key.window.bucket(now) => bucket.count,
            _ => 0,
        }
    }

    fn rollback(&self, key: &CounterKey, now: u64) {
        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(bucket) = counters.get_mut(key) {
            if bucket.index == key.window.bucket(now) {
                bucket.count = bucket.count.saturating_sub(1);
            }
        }
    }

    fn reset_all(&self) {
        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Whole seconds until the window containing `now` ends, at least 1.
///
/// Exactly the window length when `now` sits on a boundary.
pub fn seconds_until_reset(window: Window, now: f64) -> u64 {
    let duration = window.duration_secs() as f64;
    let remaining = duration - now.max(0.0).rem_euclid(duration);
    (remaining.ceil() as u64).clamp(1, window.duration_secs())
}
