//! Identity and traffic classification.
//!
//! Every request gets a rate limit subject (its IP, or the user id from a
//! fresh auth cookie) and a classification used by the analytics counters.
//! Nothing here can fail: bad cookies and odd header bytes degrade to the
//! anonymous, IP-keyed answer.

pub mod agent;
pub mod cookie;

use std::fmt;
use std::net::IpAddr;

use http::{Method, StatusCode};
use serde::Serialize;

use crate::core::{Context, Request};

pub use agent::AgentTable;
pub use cookie::{CookieSigner, CookieVerifier, Identity, VerificationError, AUTH_COOKIE_NAME};

/// Path prefixes of long-polling and beacon requests.
const BACKGROUND_PREFIXES: &[&str] = &["/message-bus/", "/topics/timings"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Ip,
    AuthenticatedIdentity,
}

/// Who a request is rate limited as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RateLimitSubject {
    pub kind: SubjectKind,
    pub value: String,
}

impl RateLimitSubject {
    pub fn ip(ip: IpAddr) -> Self {
        Self {
            kind: SubjectKind::Ip,
            value: ip.to_string(),
        }
    }

    pub fn identity(user_id: u64) -> Self {
        Self {
            kind: SubjectKind::AuthenticatedIdentity,
            value: user_id.to_string(),
        }
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        self.kind == SubjectKind::AuthenticatedIdentity
    }
}

impl fmt::Display for RateLimitSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SubjectKind::Ip => write!(f, "ip:{}", self.value),
            SubjectKind::AuthenticatedIdentity => write!(f, "user:{}", self.value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    #[default]
    Anonymous,
    LoggedIn,
}

/// Per-request traffic classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RequestClassification {
    pub is_crawler: bool,
    pub is_asset_path: bool,
    pub is_page_view: bool,
    pub is_mobile: bool,
    pub login_state: LoginState,
    pub is_background: bool,
    pub is_api: bool,
}

impl RequestClassification {
    #[inline]
    pub fn is_logged_in(&self) -> bool {
        self.login_state == LoginState::LoggedIn
    }
}

/// Page view rule.
///
/// A 200 response to GET or HEAD with an HTML content type, for a request
/// that is not an asset. The `Discourse-Track-View` header can only narrow
/// this: "false" or "0" excludes the request, "true", "1" or no header
/// leave it to the other checks.
pub fn is_page_view(
    status: StatusCode,
    method: &Method,
    content_type: Option<&str>,
    is_asset_path: bool,
    track_view: Option<&str>,
) -> bool {
    if let Some(value) = track_view {
        let value = value.trim();
        if value.eq_ignore_ascii_case("false") || value == "0" {
            return false;
        }
        if !(value.eq_ignore_ascii_case("true") || value == "1") {
            return false;
        }
    }

    status == StatusCode::OK
        && (*method == Method::GET || *method == Method::HEAD)
        && content_type.is_some_and(|ct| ct.trim_start().starts_with("text/html"))
        && !is_asset_path
}

/// Derives subjects and classifications from requests.
#[derive(Debug)]
pub struct Resolver {
    agents: AgentTable,
    cookies: Option<CookieVerifier>,
}

impl Resolver {
    /// `cookies` is `None` when no cookie secret is configured; every
    /// request is then anonymous.
    pub fn new(agents: AgentTable, cookies: Option<CookieVerifier>) -> Self {
        Self { agents, cookies }
    }

    pub fn agents(&self) -> &AgentTable {
        &self.agents
    }

    /// Subject and request-side classification.
    ///
    /// `is_page_view` is left false; it depends on the response and is set
    /// by the tracker once the downstream has answered.
    pub fn resolve(
        &self,
        req: &Request,
        ctx: &Context,
        skip_trust_tier: u8,
        now: u64,
    ) -> (RateLimitSubject, RequestClassification) {
        let ua = req.user_agent();
        let ua = ua.as_deref();

        let token = req.cookie(AUTH_COOKIE_NAME);
        let verified = match (&self.cookies, token) {
            (Some(verifier), Some(token)) => Some(verifier.verify(token, now)),
            _ => None,
        };

        let login_state = match &verified {
            Some(Ok(_)) => LoginState::LoggedIn,
            Some(Err(e)) if e.is_signed() => LoginState::LoggedIn,
            _ => LoginState::Anonymous,
        };

        let subject = match &verified {
            Some(Ok(identity)) if identity.trust_level >= skip_trust_tier => {
                RateLimitSubject::identity(identity.user_id)
            }
            Some(Err(e)) => {
                tracing::debug!(ip = %ctx.client_ip, error = %e, "Ignoring auth cookie");
                RateLimitSubject::ip(ctx.client_ip)
            }
            _ => RateLimitSubject::ip(ctx.client_ip),
        };

        let path = req.path();
        let classification = RequestClassification {
            is_crawler: self.agents.is_crawler(ua),
            is_asset_path: ctx.is_asset_path(),
            is_page_view: false,
            is_mobile: self.agents.is_mobile(ua),
            login_state,
            is_background: BACKGROUND_PREFIXES.iter().any(|p| path.starts_with(p)),
            is_api: req.header("api-key").is_some() || req.header("user-api-key").is_some(),
        };

        (subject, classification)
    }
}
