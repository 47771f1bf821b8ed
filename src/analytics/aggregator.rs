//! Buffered request counters.
//!
//! `record` only touches an in-process buffer. Counts reach the shared
//! backend on `flush`, called periodically by [`spawn_flusher`] and once
//! more at shutdown.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::backend::CountingBackend;
use super::record::RequestRecord;

/// Application request counters, one set per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestCounter {
    HttpTotal,
    Http2xx,
    Http3xx,
    Http4xx,
    Http5xx,
    HttpBackground,
    PageViewCrawler,
    PageViewLoggedIn,
    PageViewLoggedInMobile,
    PageViewAnon,
    PageViewAnonMobile,
}

impl RequestCounter {
    pub const ALL: [RequestCounter; 11] = [
        RequestCounter::HttpTotal,
        RequestCounter::Http2xx,
        RequestCounter::Http3xx,
        RequestCounter::Http4xx,
        RequestCounter::Http5xx,
        RequestCounter::HttpBackground,
        RequestCounter::PageViewCrawler,
        RequestCounter::PageViewLoggedIn,
        RequestCounter::PageViewLoggedInMobile,
        RequestCounter::PageViewAnon,
        RequestCounter::PageViewAnonMobile,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            RequestCounter::HttpTotal => "http_total",
            RequestCounter::Http2xx => "http_2xx",
            RequestCounter::Http3xx => "http_3xx",
            RequestCounter::Http4xx => "http_4xx",
            RequestCounter::Http5xx => "http_5xx",
            RequestCounter::HttpBackground => "http_background",
            RequestCounter::PageViewCrawler => "page_view_crawler",
            RequestCounter::PageViewLoggedIn => "page_view_logged_in",
            RequestCounter::PageViewLoggedInMobile => "page_view_logged_in_mobile",
            RequestCounter::PageViewAnon => "page_view_anon",
            RequestCounter::PageViewAnonMobile => "page_view_anon_mobile",
        }
    }
}

impl fmt::Display for RequestCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters a record contributes to.
///
/// Page views go to exactly one of crawler, logged in or anonymous
/// (anonymous views are dropped on login-required sites). Every request
/// counts towards the total and one status class, where 5xx takes
/// precedence over background requests.
pub fn counters_for(record: &RequestRecord, login_required: bool) -> Vec<RequestCounter> {
    let class = &record.classification;
    let mut out = Vec::with_capacity(4);

    if class.is_page_view {
        if class.is_crawler {
            out.push(RequestCounter::PageViewCrawler);
        } else if class.is_logged_in() {
            out.push(RequestCounter::PageViewLoggedIn);
            if class.is_mobile {
                out.push(RequestCounter::PageViewLoggedInMobile);
            }
        } else if !login_required {
            out.push(RequestCounter::PageViewAnon);
            if class.is_mobile {
                out.push(RequestCounter::PageViewAnonMobile);
            }
        }
    }

    out.push(RequestCounter::HttpTotal);

    let status = record.status;
    let class_counter = if status >= 500 {
        Some(RequestCounter::Http5xx)
    } else if class.is_background {
        Some(RequestCounter::HttpBackground)
    } else if status >= 400 {
        Some(RequestCounter::Http4xx)
    } else if status >= 300 {
        Some(RequestCounter::Http3xx)
    } else if status >= 200 {
        Some(RequestCounter::Http2xx)
    } else {
        None
    };
    out.extend(class_counter);

    out
}

/// Backend key of an application request counter.
pub fn request_key(counter: RequestCounter, day: u64) -> String {
    format!("app_req:{}:{}", day, counter.as_str())
}

/// Longest crawler user agent stored, in characters.
pub const MAX_CRAWLER_AGENT_CHARS: usize = 200;

/// Distinct crawler agents counted per day; later agents share
/// [`OTHER_CRAWLERS`].
pub const MAX_CRAWLER_AGENTS_PER_DAY: usize = 1000;

/// Agent name the overflow past [`MAX_CRAWLER_AGENTS_PER_DAY`] is counted under.
pub const OTHER_CRAWLERS: &str = "other";

/// Days of committed counters kept, counting back from the newest day seen.
pub const RETENTION_DAYS: u64 = 32;

/// Backend key of a per-agent crawler counter.
pub fn crawler_key(user_agent: &str, day: u64) -> String {
    format!("crawler:{}:{}", day, truncate_agent(user_agent))
}

fn truncate_agent(user_agent: &str) -> &str {
    match user_agent.char_indices().nth(MAX_CRAWLER_AGENT_CHARS) {
        Some((end, _)) => &user_agent[..end],
        None => user_agent,
    }
}

#[derive(Default)]
struct Pending {
    counts: HashMap<String, u64>,
    /// Crawler agents admitted per day, for the current and previous day.
    crawler_agents: HashMap<u64, HashSet<String>>,
}

impl Pending {
    /// The agent name to count `user_agent` under on `day`.
    fn crawler_agent(&mut self, user_agent: &str, day: u64) -> String {
        if !self.crawler_agents.contains_key(&day) {
            self.crawler_agents
                .retain(|&seen, _| seen.saturating_add(1) >= day);
        }
        let agents = self.crawler_agents.entry(day).or_default();
        let agent = truncate_agent(user_agent);
        if agents.contains(agent) {
            return agent.to_owned();
        }
        if agents.len() < MAX_CRAWLER_AGENTS_PER_DAY {
            agents.insert(agent.to_owned());
            return agent.to_owned();
        }
        OTHER_CRAWLERS.to_owned()
    }
}

/// Buffers counters and commits them to a shared backend.
pub struct Aggregator {
    backend: Arc<dyn CountingBackend>,
    pending: Mutex<Pending>,
    newest_day: AtomicU64,
    enabled: AtomicBool,
    login_required: AtomicBool,
}

impl Aggregator {
    pub fn new(backend: Arc<dyn CountingBackend>) -> Self {
        Self {
            backend,
            pending: Mutex::new(Pending::default()),
            newest_day: AtomicU64::new(0),
            enabled: AtomicBool::new(true),
            login_required: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CountingBackend> {
        &self.backend
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Stop buffering. Already-buffered counts stay until flushed or reset.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_login_required(&self, required: bool) {
        self.login_required.store(required, Ordering::Release);
    }

    #[inline]
    pub fn login_required(&self) -> bool {
        self.login_required.load(Ordering::Acquire)
    }

    /// Buffer the counters for one request.
    pub fn record(&self, record: &RequestRecord) {
        if !self.is_enabled() {
            return;
        }

        let day = record.day();
        self.newest_day.fetch_max(day, Ordering::AcqRel);
        let counters = counters_for(record, self.login_required());
        let crawled = counters.contains(&RequestCounter::PageViewCrawler);

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if crawled {
            let agent = pending.crawler_agent(record.user_agent.as_deref().unwrap_or(""), day);
            *pending.counts.entry(crawler_key(&agent, day)).or_insert(0) += 1;
        }
        for counter in counters {
            *pending.counts.entry(request_key(counter, day)).or_insert(0) += 1;
        }
    }

    /// Number of distinct buffered keys.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counts
            .len()
    }

    /// Commit the buffer and drop committed days older than
    /// [`RETENTION_DAYS`]. Returns how many keys were written.
    ///
    /// A second flush with nothing recorded in between writes nothing.
    pub fn flush(&self) -> usize {
        let pending = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            mem::take(&mut pending.counts)
        };

        let written = pending.len();
        for (key, by) in pending {
            self.backend.increment_by(&key, by);
        }
        if written > 0 {
            tracing::debug!(keys = written, "Flushed request counters");
        }

        let newest = self.newest_day.load(Ordering::Acquire);
        if newest > RETENTION_DAYS {
            let pruned = self.backend.prune_before(newest - RETENTION_DAYS);
            if pruned > 0 {
                tracing::debug!(keys = pruned, "Pruned expired request counters");
            }
        }
        written
    }

    /// Drop buffered and committed counts.
    pub fn reset(&self) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Pending::default();
        self.newest_day.store(0, Ordering::Release);
        self.backend.clear();
    }

    /// Committed value of `counter` for `day`.
    pub fn committed(&self, counter: RequestCounter, day: u64) -> u64 {
        self.backend.get(&request_key(counter, day))
    }

    /// Committed crawler page views for `user_agent` on `day`. Pass
    /// [`OTHER_CRAWLERS`] for the overflow bucket.
    pub fn crawler_requests(&self, user_agent: &str, day: u64) -> u64 {
        self.backend.get(&crawler_key(user_agent, day))
    }
}

/// Run `flush` every `period` until `shutdown` flips to true, then once
/// more.
pub fn spawn_flusher<F>(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    flush: F,
) -> JoinHandle<()>
where
    F: Fn() -> usize + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    flush();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let written = flush();
        tracing::debug!(keys = written, "Final counter flush");
    })
}
