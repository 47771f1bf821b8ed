//! Shared tracker state.
//!
//! One [`TrackerRuntime`] is built at startup and shared by every worker
//! through an `Arc`. It owns the counter store, the analytics aggregator,
//! the hook registries, the identity resolver and the metrics registry.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::analytics::{self, Aggregator, CountingBackend, MemoryCountingBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::hooks::{DetailedRequestLogger, HookHandle, HookRegistry, IpSkipper};
use crate::identity::{AgentTable, CookieVerifier, Resolver};
use crate::observability::Metrics;
use crate::rate_limit::{CounterStore, MemoryCounterStore, RateLimitPolicy, RateLimiter};

/// Error building a runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("metrics registry: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Process-wide tracker state.
pub struct TrackerRuntime {
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    ip_skippers: Arc<HookRegistry<IpSkipper>>,
    loggers: HookRegistry<dyn DetailedRequestLogger>,
    aggregator: Aggregator,
    resolver: Resolver,
    metrics: Metrics,
    policy: RwLock<Arc<RateLimitPolicy>>,
    rate_limiter_enabled: AtomicBool,
    performance_headers: AtomicBool,
}

impl TrackerRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Build from loaded configuration with in-memory stores and the
    /// system clock.
    pub fn from_config(config: &Config) -> Result<Self, RuntimeError> {
        let mut builder = Self::builder()
            .policy(config.rate_limit.policy())
            .agents(config.tracker.agent_table())
            .performance_headers(config.tracker.performance_headers)
            .login_required(config.tracker.login_required);
        if let Some(verifier) = config.tracker.cookie_verifier() {
            builder = builder.cookie_verifier(verifier);
        }
        builder.build()
    }

    #[inline]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[inline]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[inline]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    #[inline]
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    #[inline]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    #[inline]
    pub fn loggers(&self) -> &HookRegistry<dyn DetailedRequestLogger> {
        &self.loggers
    }

    /// Policy in effect for the next request.
    ///
    /// A disabled rate limiter reports a policy with mode `none`.
    pub fn policy(&self) -> Arc<RateLimitPolicy> {
        if !self.rate_limiter_enabled() {
            return Arc::new(RateLimitPolicy::disabled());
        }
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the policy. In-flight requests keep the one they started
    /// with.
    pub fn set_policy(&self, policy: RateLimitPolicy) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
    }

    /// Edit the current policy in place.
    pub fn update_policy(&self, f: impl FnOnce(&mut RateLimitPolicy)) {
        let mut guard = self.policy.write().unwrap_or_else(PoisonError::into_inner);
        let mut policy = RateLimitPolicy::clone(&guard);
        f(&mut policy);
        *guard = Arc::new(policy);
    }

    pub fn enable_rate_limiter(&self) {
        self.rate_limiter_enabled.store(true, Ordering::Release);
    }

    pub fn disable_rate_limiter(&self) {
        self.rate_limiter_enabled.store(false, Ordering::Release);
    }

    #[inline]
    pub fn rate_limiter_enabled(&self) -> bool {
        self.rate_limiter_enabled.load(Ordering::Acquire)
    }

    /// Forget every rate limit counter.
    pub fn clear_rate_limits(&self) {
        self.limiter.store().reset_all();
        tracing::info!("Rate limit counters cleared");
    }

    pub fn register_ip_skipper<F>(&self, skipper: F) -> HookHandle
    where
        F: Fn(IpAddr) -> bool + Send + Sync + 'static,
    {
        self.ip_skippers.register(Arc::new(skipper))
    }

    pub fn unregister_ip_skipper(&self, handle: HookHandle) -> bool {
        self.ip_skippers.unregister(handle)
    }

    pub fn register_detailed_logger<L>(&self, logger: L) -> HookHandle
    where
        L: DetailedRequestLogger + 'static,
    {
        self.loggers.register(Arc::new(logger))
    }

    pub fn unregister_detailed_logger(&self, handle: HookHandle) -> bool {
        self.loggers.unregister(handle)
    }

    #[inline]
    pub fn performance_headers(&self) -> bool {
        self.performance_headers.load(Ordering::Relaxed)
    }

    pub fn set_performance_headers(&self, enabled: bool) {
        self.performance_headers.store(enabled, Ordering::Relaxed);
    }

    /// Commit buffered request counters. Returns how many keys were
    /// written.
    pub fn flush(&self) -> usize {
        let written = self.aggregator.flush();
        self.metrics.aggregator_flushes_total.inc();
        written
    }

    /// Flush every `period` until `shutdown` is set, then once more.
    pub fn spawn_flusher(
        self: &Arc<Self>,
        period: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let runtime = Arc::clone(self);
        analytics::spawn_flusher(period, shutdown, move || runtime.flush())
    }
}

/// Builder for [`TrackerRuntime`].
///
/// Everything defaults to the in-memory implementation and the default
/// policy.
pub struct RuntimeBuilder {
    clock: Arc<dyn Clock>,
    counters: Arc<dyn CounterStore>,
    counting: Arc<dyn CountingBackend>,
    policy: RateLimitPolicy,
    agents: AgentTable,
    cookies: Option<CookieVerifier>,
    performance_headers: bool,
    login_required: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            counters: Arc::new(MemoryCounterStore::new()),
            counting: Arc::new(MemoryCountingBackend::new()),
            policy: RateLimitPolicy::default(),
            agents: AgentTable::default(),
            cookies: None,
            performance_headers: false,
            login_required: false,
        }
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counters = store;
        self
    }

    pub fn counting_backend(mut self, backend: Arc<dyn CountingBackend>) -> Self {
        self.counting = backend;
        self
    }

    pub fn policy(mut self, policy: RateLimitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn agents(mut self, agents: AgentTable) -> Self {
        self.agents = agents;
        self
    }

    pub fn cookie_verifier(mut self, verifier: CookieVerifier) -> Self {
        self.cookies = Some(verifier);
        self
    }

    pub fn performance_headers(mut self, enabled: bool) -> Self {
        self.performance_headers = enabled;
        self
    }

    pub fn login_required(mut self, required: bool) -> Self {
        self.login_required = required;
        self
    }

    pub fn build(self) -> Result<TrackerRuntime, RuntimeError> {
        let ip_skippers = Arc::new(HookRegistry::new());
        let aggregator = Aggregator::new(self.counting);
        aggregator.set_login_required(self.login_required);

        Ok(TrackerRuntime {
            clock: self.clock,
            limiter: RateLimiter::new(self.counters, Arc::clone(&ip_skippers)),
            ip_skippers,
            loggers: HookRegistry::new(),
            aggregator,
            resolver: Resolver::new(self.agents, self.cookies),
            metrics: Metrics::new()?,
            policy: RwLock::new(Arc::new(self.policy)),
            rate_limiter_enabled: AtomicBool::new(true),
            performance_headers: AtomicBool::new(self.performance_headers),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
