//! In-memory [`Network`] with scripted routes.
//!
//! Serves fixed responses keyed by URL, can be switched offline, and counts
//! every request that reaches it. Used by tests and by the smoke harness when
//! no live origin is given.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use tracing::trace;
use url::Url;

use crate::{NetError, Network, Request, Response, ResponseType};

#[derive(Debug, Clone)]
struct Route {
    status: StatusCode,
    content_type: String,
    body: Bytes,
}

/// Scripted in-memory origin.
pub struct MemoryNetwork {
    origin: Url,
    routes: Mutex<HashMap<String, Route>>,
    online: AtomicBool,
    requests: Mutex<Vec<Url>>,
}

impl MemoryNetwork {
    /// Create an empty network for `origin`.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Application origin.
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Serve `body` with status 200 at a root-relative path or absolute URL.
    pub fn serve(&self, path: &str, content_type: &str, body: impl Into<Bytes>) -> &Self {
        self.serve_status(path, StatusCode::OK, content_type, body)
    }

    /// Serve a fixed status at a root-relative path or absolute URL.
    pub fn serve_status(
        &self,
        path: &str,
        status: StatusCode,
        content_type: &str,
        body: impl Into<Bytes>,
    ) -> &Self {
        let key = match self.origin.join(path) {
            Ok(url) => route_key(&url),
            Err(_) => path.to_string(),
        };
        let route = Route {
            status,
            content_type: content_type.to_string(),
            body: body.into(),
        };
        lock(&self.routes).insert(key, route);
        self
    }

    /// Simulate losing or regaining connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of requests that reached the network, online or not.
    pub fn fetch_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Number of requests for a root-relative path or absolute URL.
    pub fn fetches_for(&self, path: &str) -> usize {
        let Ok(target) = self.origin.join(path) else {
            return 0;
        };
        let target = route_key(&target);
        lock(&self.requests)
            .iter()
            .filter(|url| route_key(url) == target)
            .count()
    }

    async fn respond(&self, request: &Request) -> Result<Response, NetError> {
        lock(&self.requests).push(request.url.clone());

        if !self.online.load(Ordering::SeqCst) {
            return Err(NetError::Offline(format!("{} unreachable", request.url)));
        }
        if !request.is_http() {
            return Err(NetError::UnsupportedScheme(request.url.scheme().to_string()));
        }

        let response_type = if request.url.origin() == self.origin.origin() {
            ResponseType::Basic
        } else {
            ResponseType::Opaque
        };

        let route = lock(&self.routes).get(&route_key(&request.url)).cloned();
        let response = match route {
            Some(route) => {
                let mut response = Response::new(route.status, route.body);
                if let Ok(value) = HeaderValue::from_str(&route.content_type) {
                    response.headers.insert(CONTENT_TYPE, value);
                }
                response
            }
            None => Response::new(StatusCode::NOT_FOUND, Bytes::new()),
        };

        trace!(url = %request.url, status = %response.status, "Memory network responded");
        Ok(response
            .with_url(request.url.clone())
            .with_type(response_type))
    }
}

impl Network for MemoryNetwork {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, NetError>> {
        Box::pin(self.respond(request))
    }
}

fn route_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
