//! End-to-end runs of the worker against a local HTTP server.

use std::sync::Arc;
use std::time::Duration;

use offline_net::{LoaderConfig, Request, ResourceLoader};
use offline_worker::{
    Cache, CacheStorage, FetchOutcome, MemoryCacheStorage, OfflineWorker, ResponseSource,
    RevalidateStatus, WorkerConfig,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve(server: &MockServer, route: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

fn worker(server: &MockServer, name: &str, storage: Arc<MemoryCacheStorage>) -> OfflineWorker {
    let config = WorkerConfig::default()
        .with_cache_name(name)
        .with_origin(format!("{}/", server.uri()))
        .with_manifest(["/", "/index.html", "/manifest.json"]);
    let loader = ResourceLoader::new(LoaderConfig {
        default_timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap();
    OfflineWorker::new(config, storage, Arc::new(loader)).unwrap()
}

fn get(server: &MockServer, route: &str) -> Request {
    Request::parse_get(&format!("{}{}", server.uri(), route)).unwrap()
}

#[tokio::test]
async fn install_skips_missing_manifest_entry() {
    let server = MockServer::start().await;
    serve(&server, "/", 200, "home").await;
    serve(&server, "/index.html", 200, "<html>").await;
    serve(&server, "/manifest.json", 404, "").await;

    let storage = Arc::new(MemoryCacheStorage::new());
    let worker = worker(&server, "inventory-v1", storage.clone());

    let report = worker.on_install().await;

    assert_eq!(report.cached.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].url.as_str().ends_with("/manifest.json"));
    assert_eq!(storage.get("inventory-v1").await.unwrap().len().await, 2);
}

#[tokio::test]
async fn stale_response_then_refreshed_copy() {
    let server = MockServer::start().await;
    serve(&server, "/", 200, "home").await;
    serve(&server, "/index.html", 200, "release 1").await;
    serve(&server, "/manifest.json", 200, "{}").await;

    let storage = Arc::new(MemoryCacheStorage::new());
    let worker = worker(&server, "inventory-v1", storage);
    worker.on_install().await;
    worker.on_activate().await;

    server.reset().await;
    serve(&server, "/index.html", 200, "release 2").await;

    let outcome = worker.on_fetch(get(&server, "/index.html")).await.unwrap();
    let FetchOutcome::Respond {
        response,
        source,
        revalidation,
    } = outcome
    else {
        panic!("expected a response");
    };
    assert_eq!(source, ResponseSource::Cache);
    assert_eq!(response.text().unwrap(), "release 1");
    assert_eq!(revalidation.settled().await, RevalidateStatus::Updated);

    let outcome = worker.on_fetch(get(&server, "/index.html")).await.unwrap();
    assert_eq!(outcome.response().unwrap().text().unwrap(), "release 2");
}

#[tokio::test]
async fn uncached_error_status_is_passed_through() {
    let server = MockServer::start().await;
    let storage = Arc::new(MemoryCacheStorage::new());
    let worker = worker(&server, "inventory-v1", storage.clone());

    let outcome = worker.on_fetch(get(&server, "/nope")).await.unwrap();
    let FetchOutcome::Respond {
        response,
        source,
        revalidation,
    } = outcome
    else {
        panic!("expected a response");
    };
    assert_eq!(source, ResponseSource::Network);
    assert_eq!(response.status.as_u16(), 404);
    assert!(matches!(
        revalidation.settled().await,
        RevalidateStatus::NotCacheable(_)
    ));

    let bucket = storage.open("inventory-v1").await.unwrap();
    assert!(bucket.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn second_version_removes_first_bucket() {
    let server = MockServer::start().await;
    serve(&server, "/", 200, "home").await;
    serve(&server, "/index.html", 200, "<html>").await;
    serve(&server, "/manifest.json", 200, "{}").await;

    let storage = Arc::new(MemoryCacheStorage::new());
    let v1 = worker(&server, "v1", storage.clone());
    v1.on_install().await;
    v1.on_activate().await;

    let v2 = worker(&server, "v2", storage.clone());
    v2.on_install().await;
    v2.on_activate().await;

    assert_eq!(storage.keys().await.unwrap(), vec!["v2"]);
}
