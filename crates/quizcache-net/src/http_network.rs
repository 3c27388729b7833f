//! reqwest-backed [`Network`] for real origins.

use std::time::Duration;

use futures::future::BoxFuture;
use http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use reqwest::Client;
use tracing::{debug, info, trace};
use url::Url;

use crate::{NetError, Network, Request, Response, ResponseType};

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Per-request timeout enforced by the client.
    pub timeout: Duration,
    /// Maximum redirects to follow. Zero leaves redirects unfollowed and
    /// reports them as opaque redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("QuizCache/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "bn-BD,bn;q=0.9,en;q=0.8".to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Network backed by a real HTTP client.
///
/// Responses are typed relative to `origin`: anything served from the origin
/// is [`ResponseType::Basic`].
pub struct HttpNetwork {
    client: Client,
    config: LoaderConfig,
    origin: Url,
}

impl HttpNetwork {
    /// Create a client for the given application origin.
    pub fn new(origin: Url, config: LoaderConfig) -> Result<Self, NetError> {
        let redirect = if config.max_redirects == 0 {
            reqwest::redirect::Policy::none()
        } else {
            reqwest::redirect::Policy::limited(config.max_redirects)
        };

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(redirect)
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = %origin, "HttpNetwork initialized");

        Ok(Self {
            client,
            config,
            origin,
        })
    }

    /// Application origin.
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn classify(&self, final_url: &Url, response: &reqwest::Response) -> ResponseType {
        if response.status().is_redirection() {
            return ResponseType::OpaqueRedirect;
        }
        if final_url.origin() == self.origin.origin() {
            return ResponseType::Basic;
        }
        if response.headers().contains_key(ACCESS_CONTROL_ALLOW_ORIGIN) {
            ResponseType::Cors
        } else {
            ResponseType::Opaque
        }
    }

    fn map_error(&self, err: reqwest::Error) -> NetError {
        if err.is_timeout() {
            NetError::Timeout(self.config.timeout)
        } else if err.is_connect() {
            NetError::Offline(err.to_string())
        } else {
            NetError::HttpError(err)
        }
    }

    async fn send(&self, request: &Request) -> Result<Response, NetError> {
        if !request.is_http() {
            return Err(NetError::UnsupportedScheme(request.url.scheme().to_string()));
        }

        debug!(url = %request.url, method = %request.method, "Fetching from network");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .header("Accept-Language", &self.config.accept_language);

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let final_url = response.url().clone();
        let redirected = final_url != request.url;
        let response_type = self.classify(&final_url, &response);
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        trace!(
            url = %final_url,
            status = %status,
            response_type = response_type.as_str(),
            body_len = body.len(),
            "Response received"
        );

        let mut out = Response::new(status, body)
            .with_url(final_url)
            .with_type(response_type);
        out.headers = headers;
        out.redirected = redirected;
        Ok(out)
    }
}

impl Network for HttpNetwork {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, NetError>> {
        Box::pin(self.send(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn network_for(server: &MockServer) -> HttpNetwork {
        let origin = Url::parse(&server.uri()).unwrap();
        HttpNetwork::new(origin, LoaderConfig::default()).unwrap()
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("QuizCache/"));
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn test_same_origin_response_is_basic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/styles/style.css"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/css")
                    .set_body_string("body{}"),
            )
            .mount(&server)
            .await;

        let network = network_for(&server).await;
        let url = network.origin().join("/styles/style.css").unwrap();
        let response = network.fetch(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.response_type, ResponseType::Basic);
        assert_eq!(response.text().unwrap(), "body{}");
        assert!(!response.redirected);
    }

    #[tokio::test]
    async fn test_error_status_is_ok_result() {
        let server = MockServer::start().await;
        Mock::given(path("/missing.js"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let network = network_for(&server).await;
        let url = network.origin().join("/missing.js").unwrap();
        let response = network.fetch(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, 404);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_cross_origin_response_is_opaque() {
        let server = MockServer::start().await;
        Mock::given(path("/font.woff2"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
            .mount(&server)
            .await;

        let network = HttpNetwork::new(
            Url::parse("https://quiz.example/").unwrap(),
            LoaderConfig::default(),
        )
        .unwrap();
        let url = Url::parse(&format!("{}/font.woff2", server.uri())).unwrap();
        let response = network.fetch(&Request::get(url)).await.unwrap();

        assert_eq!(response.response_type, ResponseType::Opaque);
    }

    #[tokio::test]
    async fn test_unfollowed_redirect_is_opaque_redirect() {
        let server = MockServer::start().await;
        Mock::given(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
            .mount(&server)
            .await;

        let origin = Url::parse(&server.uri()).unwrap();
        let config = LoaderConfig {
            max_redirects: 0,
            ..Default::default()
        };
        let network = HttpNetwork::new(origin.clone(), config).unwrap();
        let response = network
            .fetch(&Request::get(origin.join("/old").unwrap()))
            .await
            .unwrap();

        assert_eq!(response.response_type, ResponseType::OpaqueRedirect);
    }

    #[tokio::test]
    async fn test_forwards_request_headers() {
        let server = MockServer::start().await;
        Mock::given(path("/"))
            .and(header("accept", "text/html,application/xhtml+xml,*/*;q=0.8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .expect(1)
            .mount(&server)
            .await;

        let network = network_for(&server).await;
        let url = network.origin().join("/").unwrap();
        let response = network.fetch(&Request::navigate(url)).await.unwrap();
        assert!(response.ok());
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let network = HttpNetwork::new(
            Url::parse("https://quiz.example/").unwrap(),
            LoaderConfig::default(),
        )
        .unwrap();
        let url = Url::parse("chrome-extension://abc/x.js").unwrap();
        let err = network.fetch(&Request::get(url)).await.unwrap_err();
        assert!(matches!(err, NetError::UnsupportedScheme(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_an_error() {
        // Bind then drop a server so the port is closed.
        let server = MockServer::start().await;
        let origin = Url::parse(&server.uri()).unwrap();
        drop(server);

        let network = HttpNetwork::new(origin.clone(), LoaderConfig::default()).unwrap();
        let result = network.fetch(&Request::get(origin.join("/").unwrap())).await;
        assert!(result.is_err());
    }
}
