//! Integration tests for the Zoom adapters against a mock HTTP server.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use recpipe_core::domain::AuthError;
use recpipe_core::ports::{DownloadRequest, RecordingSource};
use recpipe_http::{RetryPolicy, RetryTransport};
use recpipe_zoom::{DownloaderConfig, RangedDownloader, TokenManager, ZoomClient};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn token_body() -> serde_json::Value {
    serde_json::json!({
        "access_token": "oauth-tok",
        "token_type": "bearer",
        "expires_in": 3600,
        "scope": "recording:read:admin user:read:admin"
    })
}

async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(header_exists("authorization"))
        .and(body_string_contains("grant_type=account_credentials"))
        .and(body_string_contains("account_id=acct-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
        .mount(server)
        .await;
}

fn client_for(server: &MockServer) -> ZoomClient {
    let tokens = Arc::new(TokenManager::new(
        format!("{}/oauth/token", server.uri()),
        "acct-1",
        "client-1",
        "secret-1",
    ));
    let transport = RetryTransport::new(
        reqwest::Client::new(),
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            jitter_percent: None,
            ..RetryPolicy::default()
        },
    );
    let downloader = RangedDownloader::new(
        reqwest::Client::new(),
        DownloaderConfig {
            max_retries: 1,
            retry_delay: Duration::from_millis(10),
            ..DownloaderConfig::default()
        },
    );
    ZoomClient::new(format!("{}/v2", server.uri()), tokens, transport, downloader)
}

fn meeting(uuid: &str, start: &str) -> serde_json::Value {
    serde_json::json!({
        "uuid": uuid,
        "id": 1,
        "host_id": "h",
        "topic": "Weekly Sync",
        "start_time": start,
        "recording_files": [{
            "id": format!("{uuid}-f1"),
            "file_type": "MP4",
            "file_size": 1024,
            "download_url": "https://example.invalid/dl"
        }]
    })
}

// ============================================================================
// Token manager
// ============================================================================

#[tokio::test]
async fn token_is_fetched_once_and_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
        .expect(1)
        .mount(&server)
        .await;

    let manager = TokenManager::new(
        format!("{}/oauth/token", server.uri()),
        "acct-1",
        "c",
        "s",
    );
    let cancel = CancellationToken::new();

    let first = manager.get_token(&cancel).await.unwrap();
    let second = manager.get_token(&cancel).await.unwrap();
    assert_eq!(first.access_token, "oauth-tok");
    assert_eq!(second.access_token, "oauth-tok");
    assert_eq!(
        first.scopes,
        vec!["recording:read:admin".to_string(), "user:read:admin".to_string()]
    );
}

#[tokio::test]
async fn rejected_grant_surfaces_upstream_error_and_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_client",
            "reason": "Invalid client_id or client_secret"
        })))
        .mount(&server)
        .await;

    let manager = TokenManager::new(format!("{}/oauth/token", server.uri()), "a", "c", "s");
    let err = manager
        .get_token(&CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        AuthError::Rejected { error, reason } => {
            assert_eq!(error, "invalid_client");
            assert_eq!(reason, "Invalid client_id or client_secret");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn unparseable_token_body_is_a_parsing_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let manager = TokenManager::new(format!("{}/oauth/token", server.uri()), "a", "c", "s");
    let err = manager
        .get_token(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ResponseParsing(_)));
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn listing_pages_a_chunk_to_exhaustion() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    // Page 2 (mounted first so its extra matcher is tried before page 1).
    Mock::given(method("GET"))
        .and(path("/v2/users/john@example.com/recordings"))
        .and(query_param("next_page_token", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "next_page_token": "",
            "meetings": [meeting("m2", "2024-01-20T09:00:00Z")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Page 1.
    Mock::given(method("GET"))
        .and(path("/v2/users/john@example.com/recordings"))
        .and(query_param("from", "2024-01-01"))
        .and(query_param("to", "2024-01-25"))
        .and(query_param("page_size", "300"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "next_page_token": "page-2",
            "meetings": [meeting("m1", "2024-01-10T09:00:00Z")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();
    let meetings = client
        .list_all_recordings(&cancel, "john@example.com", d("2024-01-01"), d("2024-01-25"))
        .await
        .unwrap();

    let uuids: Vec<&str> = meetings.iter().map(|m| m.uuid.as_str()).collect();
    assert_eq!(uuids, vec!["m1", "m2"]);
}

#[tokio::test]
async fn listing_shards_long_ranges_into_month_chunks() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    // Three chunks: 01-01..02-01, 02-02..03-02, 03-03..03-15. Each chunk
    // answers with one meeting named after its window start.
    for (from, uuid) in [
        ("2024-01-01", "jan"),
        ("2024-02-02", "feb"),
        ("2024-03-03", "mar"),
    ] {
        Mock::given(method("GET"))
            .and(path("/v2/users/u@x.com/recordings"))
            .and(query_param("from", from))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "next_page_token": "",
                "meetings": [meeting(uuid, "2024-01-05T09:00:00Z")]
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let client = client_for(&server);
    let cancel = CancellationToken::new();
    let meetings = client
        .list_all_recordings(&cancel, "u@x.com", d("2024-01-01"), d("2024-03-15"))
        .await
        .unwrap();

    // Every chunk's meetings, concatenated in range order, no duplicates.
    let uuids: Vec<&str> = meetings.iter().map(|m| m.uuid.as_str()).collect();
    assert_eq!(uuids, vec!["jan", "feb", "mar"]);
}

#[tokio::test]
async fn chunk_failure_aborts_the_listing() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/v2/users/u@x.com/recordings"))
        .and(query_param("from", "2024-01-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "next_page_token": "",
            "meetings": [meeting("jan", "2024-01-05T09:00:00Z")]
        })))
        .mount(&server)
        .await;
    // The second chunk consistently 404s (non-retryable).
    Mock::given(method("GET"))
        .and(path("/v2/users/u@x.com/recordings"))
        .and(query_param("from", "2024-02-02"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();
    let result = client
        .list_all_recordings(&cancel, "u@x.com", d("2024-01-01"), d("2024-03-15"))
        .await;
    assert!(result.is_err(), "partial results must not be returned");
}

#[tokio::test]
async fn meeting_detail_requests_download_access_token() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    let mut detail = meeting("m1", "2024-01-10T09:00:00Z");
    detail["download_access_token"] = serde_json::json!("short-lived-token");
    Mock::given(method("GET"))
        .and(path("/v2/meetings/m1/recordings"))
        .and(query_param("include_fields", "download_access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(detail))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();
    let rec = client.get_meeting_recordings(&cancel, "m1").await.unwrap();
    assert_eq!(rec.download_access_token.as_deref(), Some("short-lived-token"));
}

// ============================================================================
// Download auth selection
// ============================================================================

#[tokio::test]
async fn download_prefers_the_short_lived_token() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/file"))
        .and(header("authorization", "Bearer dl-tok"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = client_for(&server);
    let cancel = CancellationToken::new();

    let mut request = DownloadRequest::new(
        format!("{}/file", server.uri()),
        dir.path().join("f.bin"),
    );
    request.bearer_token = Some("dl-tok".into());
    request.expected_size = Some(64);

    let outcome = client.download_stream(&cancel, request, None).await;
    assert!(outcome.success, "outcome: {:?}", outcome.error);
    assert_eq!(outcome.bytes_downloaded, 64);
}

#[tokio::test]
async fn download_falls_back_to_oauth_token() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/file"))
        .and(header("authorization", "Bearer oauth-tok"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 32]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = client_for(&server);
    let cancel = CancellationToken::new();

    let mut request = DownloadRequest::new(
        format!("{}/file", server.uri()),
        dir.path().join("f.bin"),
    );
    request.expected_size = Some(32);

    let outcome = client.download_stream(&cancel, request, None).await;
    assert!(outcome.success, "outcome: {:?}", outcome.error);
}
