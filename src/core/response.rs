//! Responses produced by downstream handlers and by the tracker itself.

use bytes::Bytes;
use http::header::{self, HeaderName};
use http::{HeaderMap, HeaderValue, StatusCode};

/// Header carrying the exceeded limit on a 429.
pub const RATE_LIMIT_ERROR_CODE: &str = "discourse-rate-limit-error-code";

mod content_types {
    use super::*;
    pub static TEXT_PLAIN: HeaderValue = HeaderValue::from_static("text/plain; charset=utf-8");
    pub static TEXT_HTML: HeaderValue = HeaderValue::from_static("text/html; charset=utf-8");
    pub static APPLICATION_JSON: HeaderValue = HeaderValue::from_static("application/json");
}

static NOT_FOUND_BODY: Bytes = Bytes::from_static(b"Not Found");

/// HTTP response.
///
/// Not `Clone`; responses are moved from the downstream through the
/// tracker to the server.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    #[inline]
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder::new()
    }

    /// 200 with `body` and no headers.
    #[inline]
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::empty(StatusCode::OK).with_body(body)
    }

    #[inline]
    pub fn not_found() -> Self {
        Self::empty(StatusCode::NOT_FOUND).with_body(NOT_FOUND_BODY.clone())
    }

    #[inline]
    pub fn internal_error(msg: &str) -> Self {
        Self::empty(StatusCode::INTERNAL_SERVER_ERROR)
            .with_body(Bytes::copy_from_slice(msg.as_bytes()))
    }

    /// The 429 sent to a rate-limited client.
    ///
    /// Carries `Retry-After`, the error code header and a short plain-text
    /// explanation that ends with `Error code: <code>.`.
    pub fn rate_limited(error_code: &str, retry_after: u64) -> Self {
        let mut headers = HeaderMap::with_capacity(3);
        headers.insert(header::CONTENT_TYPE, content_types::TEXT_PLAIN.clone());
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        if let Ok(value) = HeaderValue::try_from(error_code) {
            headers.insert(HeaderName::from_static(RATE_LIMIT_ERROR_CODE), value);
        }

        let body = format!(
            "Slow down, too many requests from this IP address.\n\
             Please retry again in {} seconds.\n\
             Error code: {}.\n",
            retry_after, error_code
        );

        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            headers,
            body: Bytes::from(body),
        }
    }

    #[inline]
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Header value by name, if present and visible ASCII.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[inline]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Set a header in place, replacing any previous value. Invalid pairs
    /// are dropped.
    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            self.headers.insert(name, value);
        }
    }

    #[inline]
    fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

impl From<Response> for http::Response<Bytes> {
    fn from(res: Response) -> Self {
        let mut out = http::Response::new(res.body);
        *out.status_mut() = res.status;
        *out.headers_mut() = res.headers;
        out
    }
}

/// Builder for responses.
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Option<HeaderMap>, // Lazy allocation
    body: Bytes,
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: None,
            body: Bytes::new(),
        }
    }

    #[inline]
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Add a header. Invalid pairs are dropped.
    pub fn header(self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => self.typed_header(name, value),
            _ => self,
        }
    }

    #[inline]
    fn typed_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers
            .get_or_insert_with(HeaderMap::new)
            .insert(name, value);
        self
    }

    #[inline]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[inline]
    pub fn content_type(self, content_type: &str) -> Self {
        self.header(header::CONTENT_TYPE.as_str(), content_type)
    }

    /// `text/html; charset=utf-8`, the content type page views are
    /// counted for.
    #[inline]
    pub fn html(self) -> Self {
        self.typed_header(header::CONTENT_TYPE, content_types::TEXT_HTML.clone())
    }

    #[inline]
    pub fn json(self) -> Self {
        self.typed_header(header::CONTENT_TYPE, content_types::APPLICATION_JSON.clone())
    }

    #[inline]
    pub fn text(self) -> Self {
        self.typed_header(header::CONTENT_TYPE, content_types::TEXT_PLAIN.clone())
    }

    #[inline]
    pub fn build(self) -> Response {
        Response {
            status: self.status,
            headers: self.headers.unwrap_or_default(),
            body: self.body,
        }
    }
}
