//! Integration tests for the Box adapters against a mock HTTP server.

use std::sync::Arc;
use std::time::Duration;

use recpipe_box::{BoxClient, BoxTokenManager};
use recpipe_core::domain::ErrorCategory;
use recpipe_core::ports::ObjectStore;
use recpipe_http::{RetryPolicy, RetryTransport};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("box_subject_type=enterprise"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "box-tok",
            "token_type": "bearer",
            "expires_in": 4105
        })))
        .mount(server)
        .await;
}

fn client_for(server: &MockServer) -> BoxClient {
    let tokens = Arc::new(BoxTokenManager::new(
        format!("{}/oauth2/token", server.uri()),
        "client-1",
        "secret-1",
        "ent-1",
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
    BoxClient::new(
        format!("{}/2.0", server.uri()),
        format!("{}/up/2.0", server.uri()),
        tokens,
        transport,
    )
}

fn user_page() -> serde_json::Value {
    serde_json::json!({
        "total_count": 1,
        "entries": [{"id": "u-77", "type": "user", "login": "john.doe@example.com"}]
    })
}

fn folder_items(entries: serde_json::Value) -> serde_json::Value {
    let count = entries.as_array().map(|a| a.len()).unwrap_or(0);
    serde_json::json!({ "total_count": count, "entries": entries })
}

async fn mount_user_lookup(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/2.0/users"))
        .and(query_param("filter_term", "john.doe@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_page()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn finds_existing_user_root() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    mount_user_lookup(&server).await;

    Mock::given(method("GET"))
        .and(path("/2.0/folders/0/items"))
        .and(header("as-user", "u-77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(folder_items(
            serde_json::json!([{"id": "root-9", "type": "folder", "name": "zoom"}]),
        )))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();
    let root = client
        .find_user_root(&cancel, "john.doe@example.com")
        .await
        .unwrap();
    assert_eq!(root.user_id, "u-77");
    assert_eq!(root.folder_id, "root-9");
}

#[tokio::test]
async fn creates_missing_user_root() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    mount_user_lookup(&server).await;

    Mock::given(method("GET"))
        .and(path("/2.0/folders/0/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(folder_items(serde_json::json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2.0/folders"))
        .and(header("as-user", "u-77"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "root-new", "type": "folder", "name": "zoom"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let root = client
        .find_user_root(&CancellationToken::new(), "john.doe@example.com")
        .await
        .unwrap();
    assert_eq!(root.folder_id, "root-new");
}

#[tokio::test]
async fn unknown_user_is_a_client_error() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path("/2.0/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total_count": 0, "entries": []
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .find_user_root(&CancellationToken::new(), "john.doe@example.com")
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Client);
}

#[tokio::test]
async fn access_denied_surfaces_as_auth_error() {
    // Root resolution failures are user-scope preconditions upstream; the
    // orchestrator needs the Auth category to report the user as failed.
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path("/2.0/users"))
        .respond_with(ResponseTemplate::new(403).set_body_string("access denied"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .find_user_root(&CancellationToken::new(), "john.doe@example.com")
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Auth);
}

#[tokio::test]
async fn materializes_date_folders_reusing_existing_segments() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    // "2024" already exists under the root; "01" and "15" must be created.
    Mock::given(method("GET"))
        .and(path("/2.0/folders/root-9/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(folder_items(
            serde_json::json!([{"id": "y-2024", "type": "folder", "name": "2024"}]),
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2.0/folders/y-2024/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(folder_items(serde_json::json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2.0/folders"))
        .and(body_string_contains("\"name\":\"01\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "m-01", "type": "folder", "name": "01"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2.0/folders/m-01/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(folder_items(serde_json::json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2.0/folders"))
        .and(body_string_contains("\"name\":\"15\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "d-15", "type": "folder", "name": "15"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let root = recpipe_core::ports::StoreRoot {
        user_id: "u-77".into(),
        folder_id: "root-9".into(),
    };
    let leaf = client
        .find_or_create_folder_path(
            &CancellationToken::new(),
            &root,
            &["2024".into(), "01".into(), "15".into()],
        )
        .await
        .unwrap();
    assert_eq!(leaf, "d-15");
}

#[tokio::test]
async fn folder_conflict_resolves_to_existing_id() {
    // Creation races are tolerated: a 409 answer resolves to the id of the
    // already-existing folder.
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    // First listing: empty (so creation is attempted). Second listing, after
    // the 409: the folder is there.
    Mock::given(method("GET"))
        .and(path("/2.0/folders/root-9/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(folder_items(serde_json::json!([]))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2.0/folders/root-9/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(folder_items(
            serde_json::json!([{"id": "y-2024", "type": "folder", "name": "2024"}]),
        )))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2.0/folders"))
        .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
            "type": "error", "status": 409, "code": "item_name_in_use"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let root = recpipe_core::ports::StoreRoot {
        user_id: "u-77".into(),
        folder_id: "root-9".into(),
    };
    let leaf = client
        .find_or_create_folder_path(&CancellationToken::new(), &root, &["2024".into()])
        .await
        .unwrap();
    assert_eq!(leaf, "y-2024");
}

#[tokio::test]
async fn existence_probe_finds_same_named_file() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path("/2.0/folders/d-15/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(folder_items(serde_json::json!([
            {"id": "f-1", "type": "file", "name": "test-meeting-1030.mp4", "size": 1024}
        ])))).mount(&server).await;

    let client = client_for(&server);
    let root = recpipe_core::ports::StoreRoot {
        user_id: "u-77".into(),
        folder_id: "root-9".into(),
    };
    let cancel = CancellationToken::new();

    let hit = client
        .find_child_by_name(&cancel, &root, "d-15", "test-meeting-1030.mp4")
        .await
        .unwrap();
    assert_eq!(hit.unwrap().id, "f-1");

    let miss = client
        .find_child_by_name(&cancel, &root, "d-15", "other.mp4")
        .await
        .unwrap();
    assert!(miss.is_none());
}

#[tokio::test]
async fn uploads_a_local_file() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("POST"))
        .and(path("/up/2.0/files/content"))
        .and(header("as-user", "u-77"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "total_count": 1,
            "entries": [{"id": "bx-501", "type": "file", "name": "test-meeting-1030.mp4", "size": 1024}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("test-meeting-1030.mp4");
    tokio::fs::write(&local, vec![5u8; 1024]).await.unwrap();

    let client = client_for(&server);
    let root = recpipe_core::ports::StoreRoot {
        user_id: "u-77".into(),
        folder_id: "root-9".into(),
    };
    let entry = client
        .upload_stream(
            &CancellationToken::new(),
            &root,
            "d-15",
            "test-meeting-1030.mp4",
            &local,
        )
        .await
        .unwrap();
    assert_eq!(entry.id, "bx-501");
    assert_eq!(entry.size, Some(1024));
}

#[tokio::test]
async fn failed_upload_is_classified() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("POST"))
        .and(path("/up/2.0/files/content"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("f.mp4");
    tokio::fs::write(&local, b"data").await.unwrap();

    let client = client_for(&server);
    let root = recpipe_core::ports::StoreRoot {
        user_id: "u-77".into(),
        folder_id: "root-9".into(),
    };
    let err = client
        .upload_stream(&CancellationToken::new(), &root, "d-15", "f.mp4", &local)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Server);
}
