//! Tests for the HTTP object-store client
//! Uses wiremock to mock the bucket gateway

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use reqwest::Client;
use wiremock::matchers::{body_bytes, body_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use partwise::config::{Config, ConfigOptions};
use partwise::error::UploadError;
use partwise::ledger::CompletedPart;
use partwise::retry::Retryable;
use partwise::store::{encode_key, HttpObjectStore, ObjectStore};

fn create_test_store(server: &MockServer) -> HttpObjectStore {
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .unwrap();
    HttpObjectStore::with_client(client, format!("{}/", server.uri()), "test-token".to_string())
}

#[tokio::test]
async fn test_create_multipart() {
    let mock_server = MockServer::start().await;
    let metadata = general_purpose::STANDARD.encode(r#"{"contentType":"video/mp4"}"#);

    Mock::given(method("POST"))
        .and(path("/buckets/media/multipart/create"))
        .and(query_param("key", encode_key("videos/clip.mp4")))
        .and(query_param("httpMetadata", metadata.as_str()))
        .and(header("authorization", "Bearer test-token"))
        .and(header_exists("x-request-id"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "uploadId": "abc123" })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = create_test_store(&mock_server);
    let upload_id = store
        .create_multipart("media", "/videos/clip.mp4", "video/mp4")
        .await
        .unwrap();

    assert_eq!(upload_id, "abc123");
}

#[tokio::test]
async fn test_create_with_empty_upload_id_is_invalid() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/buckets/media/multipart/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "uploadId": "" })))
        .mount(&mock_server)
        .await;

    let store = create_test_store(&mock_server);
    let err = store
        .create_multipart("media", "clip.mp4", "video/mp4")
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::InvalidResponse(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_upload_part_sends_raw_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/buckets/media/multipart/upload"))
        .and(query_param("key", encode_key("clip.mp4")))
        .and(query_param("uploadId", "abc123"))
        .and(query_param("partNumber", "3"))
        .and(header("content-type", "application/octet-stream"))
        .and(body_bytes(b"part-three".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "etag": "\"e3\"" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = create_test_store(&mock_server);
    let etag = store
        .upload_part("abc123", "media", "clip.mp4", 3, Bytes::from_static(b"part-three"))
        .await
        .unwrap();

    // Opaque: returned exactly as the store sent it
    assert_eq!(etag, "\"e3\"");
}

#[tokio::test]
async fn test_upload_part_without_etag_is_invalid() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/buckets/media/multipart/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&mock_server)
        .await;

    let store = create_test_store(&mock_server);
    let err = store
        .upload_part("abc123", "media", "clip.mp4", 1, Bytes::from_static(b"x"))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/buckets/media/multipart/upload"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&mock_server)
        .await;

    let store = create_test_store(&mock_server);
    let err = store
        .upload_part("abc123", "media", "clip.mp4", 1, Bytes::from_static(b"x"))
        .await
        .unwrap_err();

    match &err {
        UploadError::Http { status, body } => {
            assert_eq!(*status, 503);
            assert_eq!(body, "Service Unavailable");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_client_errors_are_terminal() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/buckets/media/multipart/upload"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
        .mount(&mock_server)
        .await;

    let store = create_test_store(&mock_server);
    let err = store
        .upload_part("abc123", "media", "clip.mp4", 1, Bytes::from_static(b"x"))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Http { status: 403, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_complete_multipart_sends_ordered_manifest() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/buckets/media/multipart/complete"))
        .and(body_json(serde_json::json!({
            "key": encode_key("clip.mp4"),
            "uploadId": "abc123",
            "parts": [
                { "partNumber": 1, "etag": "e1" },
                { "partNumber": 2, "etag": "e2" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "etag": "final",
            "size": 25
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = create_test_store(&mock_server);
    let parts = vec![CompletedPart::new(1, "e1"), CompletedPart::new(2, "e2")];
    let object = store
        .complete_multipart("abc123", "media", "clip.mp4", &parts)
        .await
        .unwrap();

    assert_eq!(object.key, "clip.mp4");
    assert_eq!(object.etag.as_deref(), Some("final"));
    assert_eq!(object.size, Some(25));
}

#[tokio::test]
async fn test_abort_multipart() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/buckets/media/multipart/abort"))
        .and(body_json(serde_json::json!({
            "key": encode_key("clip.mp4"),
            "uploadId": "abc123"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = create_test_store(&mock_server);
    store
        .abort_multipart("abc123", "media", "clip.mp4")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let config = Config::new(
        "http://127.0.0.1:1".to_string(),
        "test-token".to_string(),
        ConfigOptions {
            request_timeout_secs: Some(2),
            ..ConfigOptions::default()
        },
    )
    .unwrap();
    let store = HttpObjectStore::new(&config).unwrap();

    let err = store
        .create_multipart("media", "clip.mp4", "video/mp4")
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Transport(_)));
    assert!(err.is_transient());
}
