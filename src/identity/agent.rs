//! User-agent classification table.
//!
//! Built once at startup from three pipe-separated pattern lists and then
//! shared read-only by every worker.

use regex::{Regex, RegexBuilder};

pub const DEFAULT_BROWSER_AGENTS: &str = "trident|webkit|gecko|chrome|safari|msie|opera|goanna";
pub const DEFAULT_CRAWLER_AGENTS: &str =
    "rss|bot|spider|crawler|facebook|archive|wayback|ping|monitor|lighthouse";
pub const DEFAULT_CRAWLER_BYPASS_AGENTS: &str = "cubot|discoursehub";

/// Substrings that mark a mobile device.
const MOBILE_TOKENS: &[&str] = &[
    "Mobile",
    "Android",
    "iPhone",
    "iPod",
    "Opera Mini",
    "BlackBerry",
    "IEMobile",
    "webOS",
];

/// Tablets are counted as desktop traffic.
const NOT_MOBILE_TOKENS: &[&str] = &["iPad"];

/// Compiled agent patterns.
#[derive(Debug, Clone)]
pub struct AgentTable {
    browser: Option<Regex>,
    crawler: Option<Regex>,
    bypass: Option<Regex>,
}

impl AgentTable {
    /// Build from pipe-separated lists. Each entry is matched literally and
    /// case-insensitively; an empty list matches nothing.
    pub fn new(browser_agents: &str, crawler_agents: &str, bypass_agents: &str) -> Self {
        Self {
            browser: compile(browser_agents),
            crawler: compile(crawler_agents),
            bypass: compile(bypass_agents),
        }
    }

    /// True when the agent should be counted as a crawler.
    ///
    /// A missing agent, or one that does not look like a browser, is a
    /// crawler. A browser-like agent is a crawler if it matches the crawler
    /// list and none of the bypass entries.
    pub fn is_crawler(&self, user_agent: Option<&str>) -> bool {
        let Some(ua) = user_agent.map(str::trim).filter(|ua| !ua.is_empty()) else {
            return true;
        };

        if !matches(&self.browser, ua) {
            return true;
        }

        matches(&self.crawler, ua) && !matches(&self.bypass, ua)
    }

    /// True when the agent names a mobile device (tablets excluded).
    pub fn is_mobile(&self, user_agent: Option<&str>) -> bool {
        let Some(ua) = user_agent else {
            return false;
        };
        MOBILE_TOKENS.iter().any(|t| ua.contains(t))
            && !NOT_MOBILE_TOKENS.iter().any(|t| ua.contains(t))
    }
}

impl Default for AgentTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_BROWSER_AGENTS,
            DEFAULT_CRAWLER_AGENTS,
            DEFAULT_CRAWLER_BYPASS_AGENTS,
        )
    }
}

#[inline]
fn matches(re: &Option<Regex>, ua: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(ua))
}

fn compile(list: &str) -> Option<Regex> {
    let alternatives: Vec<String> = list
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return None;
    }

    RegexBuilder::new(&alternatives.join("|"))
        .case_insensitive(true)
        .build()
        .map_err(|e| tracing::warn!("Invalid user agent pattern list '{}': {}", list, e))
        .ok()
}
