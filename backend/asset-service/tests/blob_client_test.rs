use asset_service::config::BlobConfig;
use asset_service::services::blob::{
    BlobKey, BlobStore, BlobStoreError, DeleteOutcome, HttpBlobStore,
};
use bytes::Bytes;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ZONE: &str = "lavi-test";
const ACCESS_KEY: &str = "zone-secret";

fn store(server: &MockServer) -> HttpBlobStore {
    HttpBlobStore::from_config(
        &BlobConfig {
            storage_base_url: server.uri(),
            zone: ZONE.to_string(),
            access_key: ACCESS_KEY.to_string(),
            cdn_base_url: server.uri(),
        },
        Duration::from_secs(5),
    )
    .unwrap()
}

fn key() -> BlobKey {
    BlobKey::new(Uuid::new_v4(), "cover.jpg").unwrap()
}

#[tokio::test]
async fn test_put_sends_bytes_with_access_key() {
    let server = MockServer::start().await;
    let key = key();
    Mock::given(method("PUT"))
        .and(path(format!("/{ZONE}/{key}")))
        .and(header("AccessKey", ACCESS_KEY))
        .and(body_bytes(b"jpeg-bytes".to_vec()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let location = store(&server)
        .put(&key, Bytes::from_static(b"jpeg-bytes"))
        .await
        .unwrap();

    assert_eq!(location.key, key);
    assert_eq!(location.url, format!("{}/{key}", server.uri()));
}

#[tokio::test]
async fn test_put_rejected_by_storage_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let err = store(&server)
        .put(&key(), Bytes::from_static(b"x"))
        .await
        .unwrap_err();

    match err {
        BlobStoreError::Status {
            operation,
            status,
            body,
        } => {
            assert_eq!(operation, "put");
            assert_eq!(status, 401);
            assert_eq!(body, "bad key");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_existing_object() {
    let server = MockServer::start().await;
    let key = key();
    Mock::given(method("DELETE"))
        .and(path(format!("/{ZONE}/{key}")))
        .and(header("AccessKey", ACCESS_KEY))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = store(&server).delete(&key).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted);
}

#[tokio::test]
async fn test_delete_missing_object_is_already_absent() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let outcome = store(&server).delete(&key()).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::AlreadyAbsent);
}

#[tokio::test]
async fn test_delete_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = store(&server).delete(&key()).await.unwrap_err();
    assert!(matches!(
        err,
        BlobStoreError::Status {
            operation: "delete",
            status: 500,
            ..
        }
    ));
}

#[tokio::test]
async fn test_fetch_reads_public_url() {
    let server = MockServer::start().await;
    let key = key();
    Mock::given(method("GET"))
        .and(path(format!("/{key}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"pixels".to_vec()))
        .mount(&server)
        .await;

    let store = store(&server);
    let url = store.public_url(&key);
    let data = store.fetch(&url).await.unwrap();

    assert_eq!(data, Bytes::from_static(b"pixels"));
    assert_eq!(store.key_from_url(&url).unwrap(), key);
}

#[tokio::test]
async fn test_fetch_missing_object() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = store(&server);
    let err = store.fetch(&store.public_url(&key())).await.unwrap_err();
    assert!(matches!(err, BlobStoreError::Status { status: 404, .. }));
}
