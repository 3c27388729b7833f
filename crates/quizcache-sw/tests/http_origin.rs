//! Worker host over a real HTTP origin.

use std::sync::Arc;

use http::StatusCode;
use quizcache_net::{HttpNetwork, LoaderConfig, Request};
use quizcache_sw::{
    CacheStore, FallbackCategory, FetchOutcome, VersionDescriptor, WorkerConfig, WorkerHost,
};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHELL: &[(&str, &str, &str)] = &[
    ("/", "text/html", "<html>root</html>"),
    ("/index.html", "text/html", "<html>quiz</html>"),
    ("/styles/style.css", "text/css", "body { margin: 0 }"),
    ("/js/main.js", "text/javascript", "console.log('quiz')"),
];

async fn origin_server() -> MockServer {
    let server = MockServer::start().await;
    for (route, content_type, body) in SHELL {
        Mock::given(method("GET"))
            .and(path(*route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", *content_type)
                    .set_body_string(*body),
            )
            .mount(&server)
            .await;
    }
    server
}

fn host_for(origin: &Url) -> WorkerHost {
    let network = HttpNetwork::new(origin.clone(), LoaderConfig::default()).unwrap();
    WorkerHost::new(origin.clone(), CacheStore::default(), Arc::new(network)).0
}

fn config_for(origin: &Url, tag: &str) -> WorkerConfig {
    WorkerConfig::new(origin.clone(), VersionDescriptor::new(tag))
        .with_assets(SHELL.iter().map(|(route, _, _)| *route))
}

#[tokio::test]
async fn shell_survives_the_origin_going_away() {
    let server = origin_server().await;
    let origin = Url::parse(&server.uri()).unwrap();
    let host = host_for(&origin);

    let report = host.deploy(config_for(&origin, "v2")).await.unwrap();
    assert_eq!(report.install.cached, SHELL.len());
    drop(server);

    let script = host
        .handle_fetch(Request::get(origin.join("/js/main.js").unwrap()))
        .await
        .unwrap();
    assert!(script.is_cache_hit());

    let nav = Request::navigate(origin.join("/arts/history").unwrap());
    match host.handle_fetch(nav).await.unwrap() {
        FetchOutcome::Fallback { category, response } => {
            assert_eq!(category, FallbackCategory::Document);
            assert_eq!(response.text().unwrap(), "<html>quiz</html>");
        }
        other => panic!("expected document fallback, got {other:?}"),
    }

    let data = Request::get(origin.join("/api/results.json").unwrap());
    let response = host.fetch(data).await.unwrap();
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["error"], "offline");
}

#[tokio::test]
async fn server_error_is_not_cached() {
    let server = origin_server().await;
    Mock::given(method("GET"))
        .and(path("/api/leaderboard"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let origin = Url::parse(&server.uri()).unwrap();
    let host = host_for(&origin);
    host.deploy(config_for(&origin, "v2")).await.unwrap();

    let request = Request::get(origin.join("/api/leaderboard").unwrap());
    match host.handle_fetch(request).await.unwrap() {
        FetchOutcome::Network { response, stored } => {
            assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
            assert!(!stored);
        }
        other => panic!("expected network response, got {other:?}"),
    }
    assert_eq!(host.store().entry_count("dynamic-v2").await, 0);
}

#[tokio::test]
async fn install_against_a_partial_origin_fails() {
    let server = origin_server().await;
    let origin = Url::parse(&server.uri()).unwrap();
    let host = host_for(&origin);

    let config = config_for(&origin, "v3").with_assets(["/", "/js/missing.js"]);
    let err = host.deploy(config).await.unwrap_err();

    assert_eq!(err.category(), "install");
    assert!(host.store().list_generation_names().await.is_empty());
}
