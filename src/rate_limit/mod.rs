//! Per-IP and per-user rate limiting.
//!
//! - [`counter`] - fixed-window counters and the shared store
//! - [`RateLimiter`] - policy evaluation against the store
//! - [`exempt`] - private-address and static allow-list checks

pub mod counter;
mod engine;
pub mod exempt;
mod policy;

pub use counter::{CounterKey, CounterScope, CounterStore, MemoryCounterStore, Window};
pub use engine::{Evaluation, RateLimiter, Ticket};
pub use exempt::{is_private_ip, StaticExemptList};
pub use policy::{Decision, LimitErrorCode, ParseModeError, RateLimitMode, RateLimitPolicy};
