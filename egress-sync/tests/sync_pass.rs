use std::time::Duration;

use egress_core::{EgressClient, RetryPolicy, VersionMarker};
use egress_sync::sync::engine::SyncEngine;
use egress_sync::sync::sink::{DirectorySink, HttpObjectSink};
use egress_sync::sync::tracking::TrackingStore;
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> EgressClient {
    EgressClient::with_base_url(&server.uri(), "ws-1", "test-token")
        .unwrap()
        .with_retry(RetryPolicy::default().with_base_delay(Duration::from_millis(1)))
}

async fn mount_listing(server: &MockServer, files: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/workspaces/ws-1/files"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": files })))
        .mount(server)
        .await;
}

async fn mount_download(server: &MockServer, id: &str, body: &'static [u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/files/{id}/download")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn mirrors_workspace_into_directory_and_picks_up_changes() {
    let api = MockServer::start().await;
    mount_listing(
        &api,
        json!([
            { "id": "A", "name": "reports/q1.csv", "lastModified": "2024-01-01T00:00:00Z" },
            { "id": "B", "name": "notes.txt", "lastModified": "2024-01-02T00:00:00Z" }
        ]),
    )
    .await;
    mount_download(&api, "A", b"q1").await;
    mount_download(&api, "B", b"notes v1").await;

    let mirror = tempdir().unwrap();
    let state = tempdir().unwrap();
    let store = TrackingStore::new(state.path().join("downloaded_files.json"));
    let engine = SyncEngine::new(
        client_for(&api),
        store.clone(),
        DirectorySink::new(mirror.path()),
    );

    let first = engine.run().await.unwrap();
    assert_eq!(first.transferred, 2);
    assert_eq!(
        std::fs::read(mirror.path().join("uploads/reports/q1.csv")).unwrap(),
        b"q1"
    );

    let second = engine.run().await.unwrap();
    assert_eq!(second.transferred, 0);
    assert_eq!(second.skipped, 2);

    api.reset().await;
    mount_listing(
        &api,
        json!([
            { "id": "A", "name": "reports/q1.csv", "lastModified": "2024-01-01T00:00:00Z" },
            { "id": "B", "name": "notes.txt", "lastModified": "2024-03-01T00:00:00Z" }
        ]),
    )
    .await;
    mount_download(&api, "B", b"notes v2").await;

    let third = engine.run().await.unwrap();
    assert_eq!(third.transferred, 1);
    assert_eq!(
        std::fs::read(mirror.path().join("uploads/notes.txt")).unwrap(),
        b"notes v2"
    );
    assert_eq!(
        store.load().await.unwrap().get("B"),
        Some(&VersionMarker::from("2024-03-01T00:00:00Z"))
    );
}

#[tokio::test]
async fn streams_downloads_into_http_object_store() {
    let api = MockServer::start().await;
    let store_server = MockServer::start().await;
    mount_listing(
        &api,
        json!([{ "id": "A", "name": "a.bin", "lastModified": 1 }]),
    )
    .await;
    mount_download(&api, "A", b"binary payload").await;
    Mock::given(method("PUT"))
        .and(path("/archive/uploads/a.bin"))
        .and(body_bytes(b"binary payload".to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&store_server)
        .await;

    let state = tempdir().unwrap();
    let engine = SyncEngine::new(
        client_for(&api),
        TrackingStore::new(state.path().join("state.json")),
        HttpObjectSink::new(&store_server.uri(), "archive").unwrap(),
    );

    let report = engine.run().await.unwrap();
    assert_eq!(report.transferred, 1);
    assert!(report.is_success());
}

#[tokio::test]
async fn object_store_rejection_is_retried_on_next_run() {
    let api = MockServer::start().await;
    let store_server = MockServer::start().await;
    mount_listing(
        &api,
        json!([{ "id": "A", "name": "a.bin", "lastModified": 1 }]),
    )
    .await;
    mount_download(&api, "A", b"payload").await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&store_server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&store_server)
        .await;

    let state = tempdir().unwrap();
    let store = TrackingStore::new(state.path().join("state.json"));
    let engine = SyncEngine::new(
        client_for(&api),
        store.clone(),
        HttpObjectSink::new(&store_server.uri(), "archive").unwrap(),
    );

    let first = engine.run().await.unwrap();
    assert_eq!(first.failed(), 1);
    assert!(store.load().await.unwrap().is_empty());

    let second = engine.run().await.unwrap();
    assert_eq!(second.transferred, 1);
    assert_eq!(
        store.load().await.unwrap().get("A"),
        Some(&VersionMarker::Integer(1))
    );
}
