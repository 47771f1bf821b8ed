//! Shared counting backend the aggregator commits into.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// Shared store of named counters.
///
/// `increment_by` must be atomic per key; several aggregators may commit
/// into the same backend.
pub trait CountingBackend: Send + Sync {
    fn increment_by(&self, key: &str, by: u64);

    fn get(&self, key: &str) -> u64;

    /// Copy of every counter, ordered by key.
    fn snapshot(&self) -> BTreeMap<String, u64>;

    fn clear(&self);

    /// Drop day-bucketed counters older than `day`. Returns how many were
    /// dropped. Stores that expire keys themselves keep the default.
    fn prune_before(&self, day: u64) -> usize {
        let _ = day;
        0
    }
}

/// Day bucket of a `<kind>:<day>:<name>` key.
fn key_day(key: &str) -> Option<u64> {
    key.split(':').nth(1)?.parse().ok()
}

/// In-process counting backend.
#[derive(Debug, Default)]
pub struct MemoryCountingBackend {
    counters: RwLock<HashMap<String, u64>>,
}

impl MemoryCountingBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CountingBackend for MemoryCountingBackend {
    fn increment_by(&self, key: &str, by: u64) {
        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match counters.get_mut(key) {
            Some(v) => *v = v.saturating_add(by),
            None => {
                counters.insert(key.to_string(), by);
            }
        }
    }

    fn get(&self, key: &str) -> u64 {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    fn clear(&self) {
        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn prune_before(&self, day: u64) -> usize {
        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = counters.len();
        counters.retain(|key, _| key_day(key).map_or(true, |d| d >= day));
        before - counters.len()
    }
}
