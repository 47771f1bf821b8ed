//! Admission decisions.

use std::net::IpAddr;
use std::sync::Arc;

use crate::hooks::{HookRegistry, IpSkipper};
use crate::identity::{RateLimitSubject, RequestClassification};

use super::counter::{seconds_until_reset, CounterKey, CounterScope, CounterStore, Window};
use super::exempt::is_private_ip;
use super::policy::{Decision, LimitErrorCode, RateLimitMode, RateLimitPolicy};

/// Counter family a subject is limited under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Ip,
    Id,
}

impl Family {
    fn code(self, scope: CounterScope, window: Window) -> LimitErrorCode {
        match (self, scope, window) {
            (Family::Ip, CounterScope::Assets, _) => LimitErrorCode::IpAssets10Secs,
            (Family::Id, CounterScope::Assets, _) => LimitErrorCode::IdAssets10Secs,
            (Family::Ip, CounterScope::Requests, Window::TenSeconds) => LimitErrorCode::Ip10Secs,
            (Family::Ip, CounterScope::Requests, Window::SixtySeconds) => LimitErrorCode::Ip60Secs,
            (Family::Id, CounterScope::Requests, Window::TenSeconds) => LimitErrorCode::Id10Secs,
            (Family::Id, CounterScope::Requests, Window::SixtySeconds) => LimitErrorCode::Id60Secs,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Family::Ip => "IP",
            Family::Id => "user_id",
        }
    }
}

/// Counters touched by one admission check.
///
/// Handed back to [`RateLimiter::reconcile_asset`] once the downstream has
/// answered, so a request that turned out to be an asset can be moved
/// from the request counters to the asset counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ticket {
    counted: Option<Counted>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Counted {
    subject: String,
    requests: Vec<Window>,
    asset_counted: bool,
    asset_limited: bool,
}

impl Ticket {
    /// True if no counter was touched (mode none or exempt subject).
    pub fn is_empty(&self) -> bool {
        self.counted.is_none()
    }

    /// Request windows incremented for this request.
    pub fn request_windows(&self) -> &[Window] {
        self.counted
            .as_ref()
            .map(|c| c.requests.as_slice())
            .unwrap_or(&[])
    }

    pub fn counted_as_asset(&self) -> bool {
        self.counted.as_ref().is_some_and(|c| c.asset_counted)
    }
}

/// Result of [`RateLimiter::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: Decision,
    pub ticket: Ticket,
}

impl Evaluation {
    fn untouched() -> Self {
        Self {
            decision: Decision::admit(),
            ticket: Ticket::default(),
        }
    }
}

/// Evaluates policies against the shared counter store.
///
/// Holds no per-request state; the policy is passed in on every call.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    skippers: Arc<HookRegistry<IpSkipper>>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, skippers: Arc<HookRegistry<IpSkipper>>) -> Self {
        Self { store, skippers }
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// True if `ip` is never limited under `policy`.
    ///
    /// Checked before any counter is touched.
    pub fn is_exempt(&self, ip: IpAddr, policy: &RateLimitPolicy) -> bool {
        if !policy.rate_limit_private_ips && is_private_ip(ip) {
            return true;
        }
        policy.static_exempt.contains(ip) || self.skippers.skips(ip)
    }

    /// Decide whether a request may reach the downstream handler.
    ///
    /// `now` is unix seconds with sub-second precision; it is only used for
    /// bucket selection and the retry delay.
    pub fn evaluate(
        &self,
        client_ip: IpAddr,
        subject: &RateLimitSubject,
        classification: &RequestClassification,
        policy: &RateLimitPolicy,
        now: f64,
    ) -> Evaluation {
        if policy.mode == RateLimitMode::None {
            return Evaluation::untouched();
        }
        if self.is_exempt(client_ip, policy) {
            return Evaluation::untouched();
        }

        let family = if subject.is_identity() {
            Family::Id
        } else {
            Family::Ip
        };
        let secs = now.max(0.0) as u64;

        let mut counted = Counted {
            subject: subject.value.clone(),
            requests: Vec::with_capacity(2),
            asset_counted: false,
            asset_limited: policy.per_10s_asset_limit.is_some(),
        };

        let exceeded = self.count(&mut counted, classification, policy, secs);

        let decision = match exceeded {
            None => Decision::admit(),
            Some((scope, window)) => {
                let code = family.code(scope, window);
                if policy.mode.warns() {
                    warn_exceeded(family, scope, window, client_ip, code);
                }
                let blocked = policy.mode.blocks();
                Decision {
                    admitted: !blocked,
                    error_code: Some(code),
                    retry_after_seconds: blocked.then(|| seconds_until_reset(window, now)),
                    warned: policy.mode.warns(),
                }
            }
        };

        Evaluation {
            decision,
            ticket: Ticket {
                counted: Some(counted),
            },
        }
    }

    /// Increment counters in priority order. Returns the first exceeded
    /// limit.
    fn count(
        &self,
        counted: &mut Counted,
        classification: &RequestClassification,
        policy: &RateLimitPolicy,
        now: u64,
    ) -> Option<(CounterScope, Window)> {
        if let Some(limit) = policy.per_10s_asset_limit {
            let key = asset_key(&counted.subject);
            if self.store.count(&key, now) >= limit {
                return Some((CounterScope::Assets, Window::TenSeconds));
            }
            if classification.is_asset_path {
                self.store.increment(&key, now);
                counted.asset_counted = true;
                return None;
            }
        }

        for (window, limit) in [
            (Window::TenSeconds, policy.per_10s_limit),
            (Window::SixtySeconds, policy.per_60s_limit),
        ] {
            let Some(limit) = limit else { continue };
            let key = CounterKey::new(CounterScope::Requests, counted.subject.as_str(), window);
            let count = self.store.increment(&key, now);
            counted.requests.push(window);
            if count > limit {
                return Some((CounterScope::Requests, window));
            }
        }

        None
    }

    /// Move a request that the downstream flagged as an asset from the
    /// request counters to the asset counter.
    ///
    /// Never rejects: the response already exists. An exceeded asset limit
    /// only affects the next request.
    pub fn reconcile_asset(&self, ticket: &Ticket, now: u64) {
        let Some(counted) = &ticket.counted else {
            return;
        };
        if counted.asset_counted {
            return;
        }

        for window in &counted.requests {
            let key = CounterKey::new(CounterScope::Requests, counted.subject.as_str(), *window);
            self.store.rollback(&key, now);
        }
        if counted.asset_limited {
            self.store.increment(&asset_key(&counted.subject), now);
        }
    }
}

#[inline]
fn asset_key(subject: &str) -> CounterKey {
    CounterKey::new(CounterScope::Assets, subject, Window::TenSeconds)
}

fn warn_exceeded(
    family: Family,
    scope: CounterScope,
    window: Window,
    ip: IpAddr,
    code: LimitErrorCode,
) {
    let kind = match scope {
        CounterScope::Assets => "asset ",
        CounterScope::Requests => "",
    };
    tracing::warn!(
        ip = %ip,
        code = %code,
        "Global {}{} rate limit exceeded for {}: {} second rate limit",
        kind,
        family.label(),
        ip,
        window.duration_secs()
    );
}
