//! End-to-end behaviour of the worker host against a scripted origin.

use std::sync::Arc;

use http::StatusCode;
use quizcache_net::{MemoryNetwork, Request};
use quizcache_sw::{
    CacheStore, FallbackCategory, FetchOutcome, MessageEvent, MessageOutcome, VersionDescriptor,
    WorkerConfig, WorkerHost, DEFAULT_STATIC_ASSETS,
};
use serde_json::json;
use url::Url;

fn origin() -> Url {
    Url::parse("https://ssc-quiz.example/").unwrap()
}

/// An origin serving the full quiz shell.
fn quiz_origin() -> Arc<MemoryNetwork> {
    let net = Arc::new(MemoryNetwork::new(origin()));
    for asset in DEFAULT_STATIC_ASSETS {
        let content_type = if asset.ends_with(".css") {
            "text/css"
        } else if asset.ends_with(".js") {
            "text/javascript"
        } else if asset.ends_with(".json") {
            "application/manifest+json"
        } else {
            "text/html"
        };
        net.serve(asset, content_type, format!("contents of {asset}"));
    }
    net
}

fn config(tag: &str) -> WorkerConfig {
    WorkerConfig::new(origin(), VersionDescriptor::new(tag))
}

fn host(net: &Arc<MemoryNetwork>) -> WorkerHost {
    WorkerHost::new(origin(), CacheStore::default(), net.clone()).0
}

fn get(path: &str) -> Request {
    Request::get(origin().join(path).unwrap())
}

#[tokio::test]
async fn cached_requests_skip_the_network() {
    let net = quiz_origin();
    let host = host(&net);
    host.deploy(config("v2")).await.unwrap();
    let after_install = net.fetch_count();

    for asset in DEFAULT_STATIC_ASSETS {
        let outcome = host.handle_fetch(get(asset)).await.unwrap();
        assert!(outcome.is_cache_hit(), "{asset} should be cached");
    }
    assert_eq!(net.fetch_count(), after_install);
}

#[tokio::test]
async fn runtime_responses_are_served_from_dynamic_next_time() {
    let net = quiz_origin();
    net.serve("/img/banner.png", "image/png", vec![0u8; 64]);
    let host = host(&net);
    host.deploy(config("v2")).await.unwrap();

    let first = host.handle_fetch(get("/img/banner.png")).await.unwrap();
    assert!(matches!(first, FetchOutcome::Network { stored: true, .. }));

    match host.handle_fetch(get("/img/banner.png")).await.unwrap() {
        FetchOutcome::Cache { generation, .. } => assert_eq!(generation, "dynamic-v2"),
        other => panic!("expected dynamic hit, got {other:?}"),
    }
    assert_eq!(net.fetches_for("/img/banner.png"), 1);
}

#[tokio::test]
async fn activation_leaves_only_current_generations() {
    let net = quiz_origin();
    net.serve("/img/banner.png", "image/png", "png");
    let host = host(&net);

    host.deploy(config("v1")).await.unwrap();
    host.handle_fetch(get("/img/banner.png")).await.unwrap();
    assert_eq!(
        host.store().list_generation_names().await,
        vec!["static-v1", "dynamic-v1"]
    );

    let report = host.deploy(config("v2")).await.unwrap();
    let activation = report.activation.unwrap();
    assert_eq!(activation.deleted, vec!["static-v1", "dynamic-v1"]);
    assert_eq!(
        host.store().list_generation_names().await,
        vec!["static-v2", "dynamic-v2"]
    );

    host.handle_fetch(get("/img/banner.png")).await.unwrap();
    for name in host.store().list_generation_names().await {
        assert!(name.ends_with("-v2"), "stale generation {name} survived");
    }
}

#[tokio::test]
async fn one_missing_asset_discards_the_version() {
    let net = quiz_origin();
    net.serve_status("/js/admin.js", StatusCode::NOT_FOUND, "text/plain", "");
    let host = host(&net);

    assert!(host.deploy(config("v3")).await.is_err());
    assert!(!host.store().has("static-v3").await);
    assert!(host.store().list_generation_names().await.is_empty());
    assert!(host.active_version().await.is_none());
}

#[tokio::test]
async fn offline_navigation_gets_the_cached_shell() {
    let net = quiz_origin();
    let host = host(&net);
    host.deploy(config("v2")).await.unwrap();
    net.set_online(false);

    let nav = Request::navigate(origin().join("/science/physics/chapter-2").unwrap());
    match host.handle_fetch(nav).await.unwrap() {
        FetchOutcome::Fallback { category, response } => {
            assert_eq!(category, FallbackCategory::Document);
            assert_eq!(response.status, StatusCode::OK);
            assert_eq!(response.text().unwrap(), "contents of /index.html");
        }
        other => panic!("expected document fallback, got {other:?}"),
    }
}

#[tokio::test]
async fn offline_generic_request_is_503() {
    let net = quiz_origin();
    let host = host(&net);
    host.deploy(config("v2")).await.unwrap();
    net.set_online(false);

    let response = host.fetch(get("/img/unknown.webp")).await.unwrap();
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(!response.body().is_empty());
}

#[tokio::test]
async fn cache_status_counts_the_static_generation() {
    let net = quiz_origin();
    net.serve("/img/banner.png", "image/png", "png");
    let host = host(&net);
    host.deploy(config("v2")).await.unwrap();
    host.handle_fetch(get("/img/banner.png")).await.unwrap();

    let (event, reply) = MessageEvent::with_reply(json!({ "type": "GET_CACHE_STATUS" }));
    host.post_message(event).await.unwrap();
    let status = reply.await.unwrap();

    let expected = host.store().entry_count("static-v2").await;
    assert_eq!(status.total_cached, expected);
    assert_eq!(status.total_cached, DEFAULT_STATIC_ASSETS.len());
    assert_eq!(status.cache_name, "static-v2");
}

#[tokio::test]
async fn reaper_is_idempotent() {
    let net = quiz_origin();
    let host = host(&net);
    host.deploy(config("v1")).await.unwrap();

    let mut v2 = config("v2");
    v2.skip_waiting_on_install = false;
    host.deploy(v2).await.unwrap();

    let first = host.activate_waiting().await.unwrap();
    assert_eq!(first.deleted, vec!["static-v1", "dynamic-v1"]);

    // Same version again: nothing left to delete.
    let second = host.deploy(config("v2")).await.unwrap();
    assert!(second.activation.unwrap().deleted.is_empty());
}

#[tokio::test]
async fn quiz_data_round_trips_through_fetch() {
    let net = quiz_origin();
    let host = host(&net);
    host.deploy(config("v2")).await.unwrap();

    let outcome = host
        .post_message(MessageEvent::new(json!({
            "type": "CACHE_QUIZ_DATA",
            "payload": { "department": "science", "best": 18 }
        })))
        .await
        .unwrap();
    assert!(matches!(outcome, MessageOutcome::QuizDataCached { .. }));

    net.set_online(false);
    let response = host.fetch(get("/api/quiz-data")).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["best"], 18);
}

#[tokio::test]
async fn unknown_messages_are_ignored() {
    let net = quiz_origin();
    let host = host(&net);
    host.deploy(config("v2")).await.unwrap();

    let outcome = host
        .post_message(MessageEvent::new(json!({ "type": "SYNC_QUIZ_RESULTS" })))
        .await
        .unwrap();
    assert_eq!(outcome, MessageOutcome::Ignored);
}

#[tokio::test]
async fn concurrent_fetches_share_the_store() {
    let net = quiz_origin();
    for i in 0..8 {
        net.serve(&format!("/img/{i}.png"), "image/png", format!("img{i}"));
    }
    let host = host(&net);
    host.deploy(config("v2")).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let host = host.clone();
            tokio::spawn(async move { host.handle_fetch(get(&format!("/img/{i}.png"))).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(host.store().entry_count("dynamic-v2").await, 8);
}

#[tokio::test]
async fn snapshot_restores_an_offline_shell() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");

    let net = quiz_origin();
    let first = host(&net);
    first.deploy(config("v2")).await.unwrap();
    first.store().save_snapshot(&path).await.unwrap();

    let restored = CacheStore::load_snapshot(&path, None).await.unwrap();
    assert_eq!(
        restored.entry_count("static-v2").await,
        DEFAULT_STATIC_ASSETS.len()
    );
}
