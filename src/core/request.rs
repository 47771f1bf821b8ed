//! The request as seen by the tracker and the downstream handler.

use std::borrow::Cow;
use std::sync::LazyLock;

use bytes::Bytes;
use http::header::{self, HeaderName};
use http::{HeaderMap, Method, Uri};

static X_REQUEST_ID: LazyLock<HeaderName> =
    LazyLock::new(|| HeaderName::from_static("x-request-id"));
static X_REQUEST_START: LazyLock<HeaderName> =
    LazyLock::new(|| HeaderName::from_static("x-request-start"));
static TRACK_VIEW: LazyLock<HeaderName> =
    LazyLock::new(|| HeaderName::from_static("discourse-track-view"));

/// Inbound request. Moved into the downstream handler, never cloned.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl Request {
    #[inline]
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
        }
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path without the query string.
    #[inline]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Header value by name; absent if not visible ASCII.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn known_header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// User-Agent with invalid byte sequences replaced by U+FFFD.
    pub fn user_agent(&self) -> Option<Cow<'_, str>> {
        self.headers
            .get(header::USER_AGENT)
            .map(|v| String::from_utf8_lossy(v.as_bytes()))
    }

    /// Value of the named cookie, searching every `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.trim())
    }

    #[inline]
    pub fn request_id(&self) -> Option<&str> {
        self.known_header(&X_REQUEST_ID)
    }

    /// Raw `X-Request-Start`, stamped by the load balancer.
    #[inline]
    pub fn request_start(&self) -> Option<&str> {
        self.known_header(&X_REQUEST_START)
    }

    /// Raw `Discourse-Track-View` override.
    #[inline]
    pub fn track_view(&self) -> Option<&str> {
        self.known_header(&TRACK_VIEW)
    }
}

impl<B: Into<Bytes>> From<http::Request<B>> for Request {
    fn from(req: http::Request<B>) -> Self {
        let (parts, body) = req.into_parts();
        Self::new(parts.method, parts.uri, parts.headers, body.into())
    }
}
