//! Wall-clock abstraction.
//!
//! Rate-limit windows, credential freshness, queue time and analytics day
//! buckets all read time through a [`Clock`] so tests can freeze it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of unix time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Seconds since the unix epoch with sub-second precision.
    fn now_secs_f64(&self) -> f64;

    /// Whole seconds since the unix epoch.
    #[inline]
    fn now_secs(&self) -> u64 {
        self.now_secs_f64().max(0.0) as u64
    }
}

/// Clock backed by `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now_secs_f64(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time value, so a clone handed to the runtime can be
/// advanced from the test body.
///
/// ```
/// use request_tracker::clock::{Clock, FrozenClock};
/// use std::time::Duration;
///
/// let clock = FrozenClock::at(1_609_462_800.0);
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now_secs(), 1_609_462_810);
/// ```
#[derive(Debug, Clone)]
pub struct FrozenClock {
    micros: Arc<AtomicU64>,
}

impl FrozenClock {
    /// Freeze at the given unix time.
    pub fn at(unix_secs: f64) -> Self {
        Self {
            micros: Arc::new(AtomicU64::new(to_micros(unix_secs))),
        }
    }

    /// Freeze at the current system time.
    pub fn now() -> Self {
        Self::at(SystemClock.now_secs_f64())
    }

    /// Jump to the given unix time.
    pub fn set(&self, unix_secs: f64) {
        self.micros.store(to_micros(unix_secs), Ordering::SeqCst);
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let delta = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        self.micros.fetch_add(delta, Ordering::SeqCst);
    }

    /// Move backward by `by`, saturating at the epoch.
    pub fn rewind(&self, by: Duration) {
        let delta = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        let _ = self
            .micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |m| {
                Some(m.saturating_sub(delta))
            });
    }
}

impl Clock for FrozenClock {
    #[inline]
    fn now_secs_f64(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

fn to_micros(unix_secs: f64) -> u64 {
    (unix_secs.max(0.0) * 1_000_000.0).round() as u64
}
