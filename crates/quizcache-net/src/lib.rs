//! # QuizCache Net
//!
//! Request/response model and network backends for the QuizCache offline layer.
//!
//! ## Design Goals
//!
//! 1. **One request model**: the interceptor, installer and cache all speak
//!    [`Request`] / [`Response`]
//! 2. **Pluggable network**: anything implementing [`Network`] can stand in for
//!    the real origin
//! 3. **Response typing**: every response carries a [`ResponseType`] so callers
//!    can tell same-origin responses from opaque ones

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use quizcache_common::QuizCacheError;
use thiserror::Error;
use url::Url;

pub mod http_network;
pub mod memory;

pub use http_network::{HttpNetwork, LoaderConfig};
pub use memory::MemoryNetwork;

/// Errors that can occur while talking to the network.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl NetError {
    /// Whether the same request could succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetError::RequestFailed(_) | NetError::Offline(_) | NetError::Timeout(_) => true,
            NetError::InvalidUrl(_) | NetError::UnsupportedScheme(_) => false,
            NetError::HttpError(err) => !err.is_builder() && !err.is_redirect(),
        }
    }
}

impl From<NetError> for QuizCacheError {
    fn from(err: NetError) -> Self {
        QuizCacheError::network_with_source("fetch failed", err)
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// How the request was issued by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document navigation.
    Navigate,
    /// Same-origin subresource.
    #[default]
    SameOrigin,
    /// Cross-origin request with CORS.
    Cors,
    /// Cross-origin request without CORS (yields opaque responses).
    NoCors,
}

/// Outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::SameOrigin,
            body: None,
        }
    }

    /// Create a document navigation (GET, `Accept: text/html`).
    pub fn navigate(url: Url) -> Self {
        let mut request = Self::get(url).header(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
        );
        request.mode = RequestMode::Navigate;
        request
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Raw `Accept` header, if present and valid UTF-8.
    pub fn accept(&self) -> Option<&str> {
        self.headers.get(ACCEPT).and_then(|v| v.to_str().ok())
    }

    /// Whether the `Accept` header mentions the given media type.
    pub fn accepts(&self, media_type: &str) -> bool {
        self.accept()
            .map(|accept| accept.to_ascii_lowercase().contains(media_type))
            .unwrap_or(false)
    }

    /// Whether the URL uses http or https.
    pub fn is_http(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }
}

/// Classification of a response relative to the requesting origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Same-origin response, fully readable.
    #[default]
    Basic,
    /// Cross-origin response allowed by CORS.
    Cors,
    /// Cross-origin response without CORS.
    Opaque,
    /// Unfollowed redirect.
    OpaqueRedirect,
    /// Locally synthesized response.
    Default,
}

impl ResponseType {
    /// Stable lowercase name, matching the DOM `Response.type` values.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Basic => "basic",
            ResponseType::Cors => "cors",
            ResponseType::Opaque => "opaque",
            ResponseType::OpaqueRedirect => "opaqueredirect",
            ResponseType::Default => "default",
        }
    }

    /// Parse the name produced by [`ResponseType::as_str`].
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "basic" => Some(ResponseType::Basic),
            "cors" => Some(ResponseType::Cors),
            "opaque" => Some(ResponseType::Opaque),
            "opaqueredirect" => Some(ResponseType::OpaqueRedirect),
            "default" => Some(ResponseType::Default),
            _ => None,
        }
    }
}

/// HTTP response with a fully buffered body.
///
/// Cloning is cheap: the body is reference counted, so a clone can be handed to
/// the cache while the original goes back to the caller.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Option<Url>,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    pub redirected: bool,
    body: Bytes,
}

impl Response {
    /// Create a basic response.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            headers: HeaderMap::new(),
            response_type: ResponseType::Basic,
            redirected: false,
            body: body.into(),
        }
    }

    /// Create a locally synthesized response with a content type.
    pub fn synthetic(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Self {
        let mut response = Self::new(status, body).with_type(ResponseType::Default);
        if let Ok(value) = HeaderValue::from_str(content_type) {
            response.headers.insert(CONTENT_TYPE, value);
        }
        response
    }

    /// Set the final URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Canonical reason phrase for the status.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    /// Parsed `Content-Type`, if any.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// A source of responses for outgoing requests.
///
/// Implemented by [`HttpNetwork`] for real origins and [`MemoryNetwork`] for
/// tests and offline demos.
pub trait Network: Send + Sync {
    /// Perform the request. `Err` means no response at all (offline, DNS,
    /// reset); HTTP error statuses are `Ok`.
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, NetError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_navigate_accepts_html() {
        let request = Request::navigate(url("https://quiz.example/"));
        assert_eq!(request.mode, RequestMode::Navigate);
        assert!(request.accepts("text/html"));
        assert!(!request.accepts("application/json"));
    }

    #[test]
    fn test_request_without_accept() {
        let request = Request::get(url("https://quiz.example/js/main.js"));
        assert!(request.accept().is_none());
        assert!(!request.accepts("text/html"));
        assert!(request.is_http());
    }

    #[test]
    fn test_non_http_scheme() {
        let request = Request::get(url("chrome-extension://abcdef/script.js"));
        assert!(!request.is_http());
    }

    #[test]
    fn test_post_request() {
        let request = Request::post(url("https://quiz.example/api"), Bytes::from_static(b"{}"));
        assert_eq!(request.method, Method::POST);
        assert!(request.body.is_some());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(NetError::Offline("no route".into()).is_retryable());
        assert!(NetError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(!NetError::InvalidUrl("::".into()).is_retryable());
        assert!(!NetError::UnsupportedScheme("ftp".into()).is_retryable());
    }

    #[test]
    fn test_request_id_uniqueness() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_synthetic_response() {
        let response = Response::synthetic(
            StatusCode::SERVICE_UNAVAILABLE,
            "text/plain; charset=utf-8",
            "offline",
        );
        assert_eq!(response.response_type, ResponseType::Default);
        assert!(!response.ok());
        assert_eq!(response.status_text(), "Service Unavailable");
        assert_eq!(response.content_type().unwrap().subtype(), mime::PLAIN);
        assert_eq!(response.text().unwrap(), "offline");
    }

    #[test]
    fn test_response_clone_shares_body() {
        let original = Response::new(StatusCode::OK, Bytes::from_static(b"body"));
        let copy = original.clone();
        assert_eq!(original.body().as_ptr(), copy.body().as_ptr());
    }

    #[test]
    fn test_response_type_names() {
        for ty in [
            ResponseType::Basic,
            ResponseType::Cors,
            ResponseType::Opaque,
            ResponseType::OpaqueRedirect,
            ResponseType::Default,
        ] {
            assert_eq!(ResponseType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(ResponseType::parse("error"), None);
    }
}
