//! Fetch Interceptor: cache-first responses with an offline fallback.
//!
//! ```text
//! GET request
//!     │
//!     ├── cache hit (static → dynamic → others) ──→ Cache
//!     │
//!     └── network
//!           ├── 200 + basic ──→ copy into dynamic ──→ Network { stored: true }
//!           ├── anything else ───────────────────────→ Network { stored: false }
//!           └── failure ──→ FallbackCategory ──→ Fallback
//! ```

use std::path::Path;
use std::sync::Arc;

use http::{Method, StatusCode};
use quizcache_common::now_millis;
use quizcache_net::{Network, Request, RequestMode, Response, ResponseType};
use serde_json::json;
use tracing::{debug, trace, warn};

use crate::config::WorkerConfig;
use crate::store::{CacheEntry, CacheKey, CacheStore};

const HTML: &str = "text/html; charset=utf-8";
const TEXT: &str = "text/plain; charset=utf-8";
const JSON: &str = "application/json";

/// Content category used to pick an offline response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackCategory {
    /// HTML documents and navigations.
    Document,
    Script,
    Style,
    Json,
    Other,
}

impl FallbackCategory {
    /// Classify a request by mode, `Accept` header and path extension.
    pub fn classify(request: &Request) -> Self {
        if request.mode == RequestMode::Navigate || request.accepts("text/html") {
            return FallbackCategory::Document;
        }
        let extension = Path::new(request.url.path())
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("js" | "mjs") => FallbackCategory::Script,
            Some("css") => FallbackCategory::Style,
            Some("json") => FallbackCategory::Json,
            _ if request.accepts("text/css") => FallbackCategory::Style,
            _ if request.accepts("application/json") => FallbackCategory::Json,
            _ => FallbackCategory::Other,
        }
    }
}

/// How a request was answered.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the caller performs the request itself.
    Passthrough,
    /// Served from a cache generation.
    Cache { generation: String, response: Response },
    /// Served from the network; `stored` when a copy landed in the dynamic
    /// generation.
    Network { response: Response, stored: bool },
    /// Network failed; synthesized or cached substitute.
    Fallback {
        category: FallbackCategory,
        response: Response,
    },
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Cache { response, .. }
            | FetchOutcome::Network { response, .. }
            | FetchOutcome::Fallback { response, .. } => Some(response),
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Cache { response, .. }
            | FetchOutcome::Network { response, .. }
            | FetchOutcome::Fallback { response, .. } => Some(response),
        }
    }

    pub fn is_cache_hit(&self) -> bool {
        matches!(self, FetchOutcome::Cache { .. })
    }
}

/// Only complete same-origin responses go into the dynamic generation.
pub fn is_cacheable(response: &Response) -> bool {
    response.status == StatusCode::OK && response.response_type == ResponseType::Basic
}

/// Per-version fetch handler.
#[derive(Clone)]
pub struct FetchInterceptor {
    config: Arc<WorkerConfig>,
    store: CacheStore,
    network: Arc<dyn Network>,
}

impl FetchInterceptor {
    pub fn new(config: Arc<WorkerConfig>, store: CacheStore, network: Arc<dyn Network>) -> Self {
        Self {
            config,
            store,
            network,
        }
    }

    fn search_order(&self) -> [String; 2] {
        let version = &self.config.version;
        [version.static_name(), version.dynamic_name()]
    }

    async fn lookup(&self, key: &CacheKey) -> Option<(String, CacheEntry)> {
        let [static_name, dynamic_name] = self.search_order();
        self.store
            .match_ordered(key, &[static_name.as_str(), dynamic_name.as_str()])
            .await
    }

    /// Answer one request.
    pub async fn handle(&self, request: &Request) -> FetchOutcome {
        if request.method != Method::GET || !request.is_http() {
            trace!(method = %request.method, url = %request.url, "Not intercepted");
            return FetchOutcome::Passthrough;
        }

        let key = CacheKey::for_request(request);
        if let Some((generation, entry)) = self.lookup(&key).await {
            debug!(url = %request.url, generation = %generation, "Cache hit");
            return FetchOutcome::Cache {
                generation,
                response: entry.to_response(),
            };
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                let stored = if is_cacheable(&response) {
                    self.store_copy(key, &response).await
                } else {
                    trace!(
                        url = %request.url,
                        status = %response.status,
                        response_type = response.response_type.as_str(),
                        "Response not cacheable"
                    );
                    false
                };
                FetchOutcome::Network { response, stored }
            }
            Err(err) => {
                debug!(url = %request.url, error = %err, "Network failed, using fallback");
                self.fallback(request, &key).await
            }
        }
    }

    /// Write a copy of `response` into the dynamic generation.
    ///
    /// The write runs on its own task so it finishes even if the caller stops
    /// waiting for the response.
    async fn store_copy(&self, key: CacheKey, response: &Response) -> bool {
        let store = self.store.clone();
        let generation = self.config.version.dynamic_name();
        let entry = CacheEntry::from_response(key, response, now_millis());
        let write = tokio::spawn(async move {
            let key = entry.key.clone();
            match store.put(&generation, entry).await {
                Ok(()) => {
                    trace!(generation = %generation, key = %key, "Stored dynamic copy");
                    true
                }
                Err(err) => {
                    warn!(generation = %generation, key = %key, error = %err, "Dynamic cache write failed");
                    false
                }
            }
        });
        match write.await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(error = %err, "Dynamic cache write task failed");
                false
            }
        }
    }

    async fn fallback(&self, request: &Request, key: &CacheKey) -> FetchOutcome {
        let category = FallbackCategory::classify(request);
        let fallback = &self.config.fallback;

        let response = match category {
            FallbackCategory::Document => match self.root_document().await {
                Some(response) => response,
                None => Response::synthetic(
                    StatusCode::SERVICE_UNAVAILABLE,
                    HTML,
                    fallback.offline_page_html.clone(),
                ),
            },
            FallbackCategory::Script | FallbackCategory::Style => match self.lookup(key).await {
                Some((_, entry)) => entry.to_response(),
                None => Response::synthetic(
                    StatusCode::SERVICE_UNAVAILABLE,
                    TEXT,
                    fallback.offline_text.clone(),
                ),
            },
            FallbackCategory::Json => {
                let body = json!({
                    "error": "offline",
                    "message": fallback.offline_json_message,
                });
                Response::synthetic(StatusCode::SERVICE_UNAVAILABLE, JSON, body.to_string())
            }
            FallbackCategory::Other => Response::synthetic(
                StatusCode::SERVICE_UNAVAILABLE,
                TEXT,
                fallback.offline_text.clone(),
            ),
        };

        let response = match response.url {
            Some(_) => response,
            None => response.with_url(request.url.clone()),
        };
        FetchOutcome::Fallback { category, response }
    }

    async fn root_document(&self) -> Option<Response> {
        let url = match self.config.resolve(&self.config.root_document) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "Root document path does not resolve");
                return None;
            }
        };
        self.lookup(&CacheKey::get(&url))
            .await
            .map(|(_, entry)| entry.to_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VersionDescriptor;
    use http::header::ACCEPT;
    use http::HeaderValue;
    use quizcache_net::MemoryNetwork;
    use url::Url;

    fn origin() -> Url {
        Url::parse("https://quiz.example/").unwrap()
    }

    fn setup() -> (FetchInterceptor, CacheStore, Arc<MemoryNetwork>) {
        let config = Arc::new(WorkerConfig::new(origin(), VersionDescriptor::new("v2")));
        let store = CacheStore::default();
        let net = Arc::new(MemoryNetwork::new(origin()));
        let interceptor = FetchInterceptor::new(config, store.clone(), net.clone());
        (interceptor, store, net)
    }

    fn get(path: &str) -> Request {
        Request::get(origin().join(path).unwrap())
    }

    async fn seed(store: &CacheStore, generation: &str, path: &str, body: &str) {
        let response = Response::new(StatusCode::OK, body.to_string());
        let entry = CacheEntry::from_response(CacheKey::for_request(&get(path)), &response, now_millis());
        store.put(generation, entry).await.unwrap();
    }

    #[test]
    fn test_classify() {
        let nav = Request::navigate(origin().join("/quiz").unwrap());
        assert_eq!(FallbackCategory::classify(&nav), FallbackCategory::Document);
        assert_eq!(FallbackCategory::classify(&get("/js/main.js")), FallbackCategory::Script);
        assert_eq!(FallbackCategory::classify(&get("/styles/style.css")), FallbackCategory::Style);
        assert_eq!(FallbackCategory::classify(&get("/manifest.json")), FallbackCategory::Json);
        assert_eq!(FallbackCategory::classify(&get("/icon.png")), FallbackCategory::Other);

        let api = get("/api/scores").header(ACCEPT, HeaderValue::from_static("application/json"));
        assert_eq!(FallbackCategory::classify(&api), FallbackCategory::Json);
    }

    #[test]
    fn test_cacheable_requires_200_basic() {
        assert!(is_cacheable(&Response::new(StatusCode::OK, "x")));
        assert!(!is_cacheable(&Response::new(StatusCode::NO_CONTENT, "")));
        assert!(!is_cacheable(
            &Response::new(StatusCode::OK, "x").with_type(ResponseType::Opaque)
        ));
    }

    #[tokio::test]
    async fn test_non_get_passes_through() {
        let (interceptor, _, net) = setup();
        let post = Request::post(origin().join("/api").unwrap(), "{}".into());
        assert!(matches!(interceptor.handle(&post).await, FetchOutcome::Passthrough));

        let ext = Request::get(Url::parse("chrome-extension://abc/x.js").unwrap());
        assert!(matches!(interceptor.handle(&ext).await, FetchOutcome::Passthrough));
        assert_eq!(net.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let (interceptor, store, net) = setup();
        seed(&store, "static-v2", "/js/main.js", "main()").await;

        let outcome = interceptor.handle(&get("/js/main.js")).await;
        assert!(outcome.is_cache_hit());
        assert_eq!(outcome.response().unwrap().text().unwrap(), "main()");
        assert_eq!(net.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_static_wins_over_dynamic() {
        let (interceptor, store, _) = setup();
        seed(&store, "dynamic-v2", "/a.js", "dynamic").await;
        seed(&store, "static-v2", "/a.js", "static").await;

        match interceptor.handle(&get("/a.js")).await {
            FetchOutcome::Cache { generation, response } => {
                assert_eq!(generation, "static-v2");
                assert_eq!(response.text().unwrap(), "static");
            }
            other => panic!("expected cache hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_miss_stores_into_dynamic() {
        let (interceptor, store, net) = setup();
        net.serve("/img/logo.svg", "image/svg+xml", "<svg/>");

        let first = interceptor.handle(&get("/img/logo.svg")).await;
        assert!(matches!(first, FetchOutcome::Network { stored: true, .. }));
        assert_eq!(store.entry_count("dynamic-v2").await, 1);

        let second = interceptor.handle(&get("/img/logo.svg")).await;
        assert!(second.is_cache_hit());
        assert_eq!(net.fetches_for("/img/logo.svg"), 1);
    }

    #[tokio::test]
    async fn test_error_and_opaque_are_not_stored() {
        let (interceptor, store, net) = setup();
        net.serve_status("/gone", StatusCode::NOT_FOUND, "text/plain", "gone");
        net.serve("https://cdn.example/lib.js", "text/javascript", "lib");

        let missing = interceptor.handle(&get("/gone")).await;
        assert!(matches!(missing, FetchOutcome::Network { stored: false, .. }));
        assert_eq!(missing.response().unwrap().status, StatusCode::NOT_FOUND);

        let cdn = Request::get(Url::parse("https://cdn.example/lib.js").unwrap());
        assert!(matches!(
            interceptor.handle(&cdn).await,
            FetchOutcome::Network { stored: false, .. }
        ));
        assert!(!store.has("dynamic-v2").await);
    }

    #[tokio::test]
    async fn test_quota_failure_still_returns_response() {
        let config = Arc::new(WorkerConfig::new(origin(), VersionDescriptor::new("v2")));
        let store = CacheStore::with_quota(Some(2));
        let net = Arc::new(MemoryNetwork::new(origin()));
        net.serve("/big.txt", "text/plain", "too large");
        let interceptor = FetchInterceptor::new(config, store.clone(), net);

        let outcome = interceptor.handle(&get("/big.txt")).await;
        assert!(matches!(outcome, FetchOutcome::Network { stored: false, .. }));
        assert_eq!(outcome.response().unwrap().text().unwrap(), "too large");
    }

    #[tokio::test]
    async fn test_offline_document_gets_root_document() {
        let (interceptor, store, net) = setup();
        seed(&store, "static-v2", "/index.html", "<html>shell</html>").await;
        net.set_online(false);

        let nav = Request::navigate(origin().join("/chapter/3").unwrap());
        match interceptor.handle(&nav).await {
            FetchOutcome::Fallback { category, response } => {
                assert_eq!(category, FallbackCategory::Document);
                assert_eq!(response.status, StatusCode::OK);
                assert_eq!(response.text().unwrap(), "<html>shell</html>");
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_offline_document_without_shell_is_503_html() {
        let (interceptor, _, net) = setup();
        net.set_online(false);

        let nav = Request::navigate(origin().join("/").unwrap());
        let response = interceptor.handle(&nav).await.into_response().unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.content_type().unwrap().subtype(), mime::HTML);
    }

    #[tokio::test]
    async fn test_offline_generic_is_503_with_body() {
        let (interceptor, _, net) = setup();
        net.set_online(false);

        let response = interceptor.handle(&get("/icon.png")).await.into_response().unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!response.body().is_empty());
        assert_eq!(response.response_type, ResponseType::Default);
    }

    #[tokio::test]
    async fn test_offline_json_body() {
        let (interceptor, _, net) = setup();
        net.set_online(false);

        let response = interceptor.handle(&get("/manifest.json")).await.into_response().unwrap();
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "offline");
    }

    #[tokio::test]
    async fn test_offline_script_is_503_text() {
        let (interceptor, _, net) = setup();
        net.set_online(false);

        match interceptor.handle(&get("/js/new.js")).await {
            FetchOutcome::Fallback { category, response } => {
                assert_eq!(category, FallbackCategory::Script);
                assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(response.content_type().unwrap().subtype(), mime::PLAIN);
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }
}
