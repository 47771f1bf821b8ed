//! Request analytics: per-request records and buffered daily counters.

mod aggregator;
mod backend;
mod record;

pub use aggregator::{
    counters_for, crawler_key, request_key, spawn_flusher, Aggregator, RequestCounter,
};
pub use backend::{CountingBackend, MemoryCountingBackend};
pub use record::{CacheOutcome, RequestRecord};
