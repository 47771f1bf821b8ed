//! Request tracker configuration.

use std::time::Duration;

use crate::identity::agent::{
    DEFAULT_BROWSER_AGENTS, DEFAULT_CRAWLER_AGENTS, DEFAULT_CRAWLER_BYPASS_AGENTS,
};
use crate::identity::cookie::DEFAULT_MAX_AGE;
use crate::identity::{AgentTable, CookieVerifier};

use super::parse::{env_bool, env_duration, env_opt, env_or};
use super::ConfigError;

/// Tracker configuration loaded from environment.
#[derive(Clone)]
pub struct TrackerConfig {
    /// Add X-Runtime, X-Queue-Time and backend call headers to responses.
    pub performance_headers: bool,
    /// Anonymous page views are not counted on login-required sites.
    pub login_required: bool,
    /// HS256 secret for the `_t` auth cookie. Unset means every request is
    /// anonymous.
    pub cookie_secret: Option<String>,
    /// Auth cookie freshness window.
    pub cookie_max_age: Duration,
    pub browser_agents: String,
    pub crawler_agents: String,
    pub crawler_bypass_agents: String,
}

impl TrackerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cookie_max_age = env_duration("AUTH_COOKIE_MAX_AGE", "10m")?.unwrap_or(DEFAULT_MAX_AGE);

        Ok(Self {
            performance_headers: env_bool("DISCOURSE_ENABLE_PERFORMANCE_HTTP_HEADERS", false),
            login_required: env_bool("LOGIN_REQUIRED", false),
            cookie_secret: env_opt("AUTH_COOKIE_SECRET"),
            cookie_max_age,
            browser_agents: env_or("BROWSER_USER_AGENTS", DEFAULT_BROWSER_AGENTS),
            crawler_agents: env_or("CRAWLER_USER_AGENTS", DEFAULT_CRAWLER_AGENTS),
            crawler_bypass_agents: env_or(
                "CRAWLER_CHECK_BYPASS_AGENTS",
                DEFAULT_CRAWLER_BYPASS_AGENTS,
            ),
        })
    }

    /// Compile the user-agent patterns.
    pub fn agent_table(&self) -> AgentTable {
        AgentTable::new(
            &self.browser_agents,
            &self.crawler_agents,
            &self.crawler_bypass_agents,
        )
    }

    pub fn cookie_verifier(&self) -> Option<CookieVerifier> {
        self.cookie_secret
            .as_deref()
            .map(|secret| CookieVerifier::new(secret.as_bytes(), self.cookie_max_age))
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            performance_headers: false,
            login_required: false,
            cookie_secret: None,
            cookie_max_age: DEFAULT_MAX_AGE,
            browser_agents: DEFAULT_BROWSER_AGENTS.into(),
            crawler_agents: DEFAULT_CRAWLER_AGENTS.into(),
            crawler_bypass_agents: DEFAULT_CRAWLER_BYPASS_AGENTS.into(),
        }
    }
}

impl std::fmt::Debug for TrackerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerConfig")
            .field("performance_headers", &self.performance_headers)
            .field("login_required", &self.login_required)
            .field("cookie_secret", &self.cookie_secret.as_ref().map(|_| "<redacted>"))
            .field("cookie_max_age", &self.cookie_max_age)
            .field("browser_agents", &self.browser_agents)
            .field("crawler_agents", &self.crawler_agents)
            .field("crawler_bypass_agents", &self.crawler_bypass_agents)
            .finish()
    }
}
