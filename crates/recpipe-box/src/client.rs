//! Box API client.
//!
//! Implements the [`ObjectStore`] port: per-user root resolution, folder
//! materialization, the check-before-upload existence probe, and streaming
//! uploads. Metadata calls go through the retry transport; uploads are sent
//! once per call because their streaming bodies cannot be replayed - upload
//! retries are paced across runs by the Status Store instead.
//!
//! All operations on a user's content carry the `As-User` header so the
//! service account acts in that user's context.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use recpipe_core::domain::ApiError;
use recpipe_core::ports::{
    ObjectStore, ProgressCallback, RemoteEntry, StoreRoot, TransferProgress, TransferState,
};
use recpipe_http::{classify, RetryTransport};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::BoxTokenManager;

/// Name of the per-user migration root folder.
const ROOT_FOLDER_NAME: &str = "zoom";

/// Folder id of every Box user's own root ("All Files").
const TOP_FOLDER_ID: &str = "0";

/// Page size for folder item listings (the API maximum).
const ITEMS_PAGE_LIMIT: u64 = 1000;

/// Minimum interval between upload progress callbacks.
const UPLOAD_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct ItemEntry {
    id: String,
    #[serde(rename = "type")]
    item_type: String,
    name: String,
    #[serde(default)]
    size: Option<u64>,
}

impl ItemEntry {
    fn is_folder(&self) -> bool {
        self.item_type == "folder"
    }

    fn into_remote(self) -> RemoteEntry {
        RemoteEntry {
            id: self.id,
            name: self.name,
            size: self.size,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ItemsPage {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    entries: Vec<ItemEntry>,
}

#[derive(Debug, Deserialize)]
struct BoxUser {
    id: String,
    login: String,
}

#[derive(Debug, Deserialize)]
struct UsersPage {
    #[serde(default)]
    entries: Vec<BoxUser>,
}

#[derive(Debug, Deserialize)]
struct CreatedFolder {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    entries: Vec<ItemEntry>,
}

// ============================================================================
// BoxClient
// ============================================================================

/// Typed client for the Box REST and upload APIs.
pub struct BoxClient {
    transport: RetryTransport,
    /// Separate client for uploads: no overall deadline, streams can run long.
    upload_client: reqwest::Client,
    base_url: String,
    upload_url: String,
    tokens: Arc<BoxTokenManager>,
}

impl BoxClient {
    pub fn new(
        base_url: impl Into<String>,
        upload_url: impl Into<String>,
        tokens: Arc<BoxTokenManager>,
        transport: RetryTransport,
    ) -> Self {
        Self {
            transport,
            upload_client: reqwest::Client::new(),
            base_url: base_url.into(),
            upload_url: upload_url.into(),
            tokens,
        }
    }

    async fn bearer(&self, cancel: &CancellationToken) -> Result<String, ApiError> {
        Ok(self
            .tokens
            .get_token(cancel)
            .await
            .map_err(ApiError::from)?
            .access_token)
    }

    /// Looks up a Box user by login email.
    async fn find_user(
        &self,
        cancel: &CancellationToken,
        email: &str,
    ) -> Result<BoxUser, ApiError> {
        let token = self.bearer(cancel).await?;
        let url = format!("{}/users", self.base_url);

        let response = self
            .transport
            .execute(cancel, |client| {
                client
                    .get(&url)
                    .bearer_auth(&token)
                    .query(&[("filter_term", email), ("fields", "id,login")])
            })
            .await?;

        let page: UsersPage = response
            .json()
            .await
            .map_err(|e| ApiError::Unknown(format!("failed to parse users response: {e}")))?;

        page.entries
            .into_iter()
            .find(|u| u.login.eq_ignore_ascii_case(email))
            .ok_or_else(|| ApiError::Client {
                status: 404,
                message: format!("no Box user with login {email}"),
            })
    }

    /// Lists every direct child of a folder, paging by offset.
    async fn list_folder_items(
        &self,
        cancel: &CancellationToken,
        as_user: &str,
        folder_id: &str,
    ) -> Result<Vec<ItemEntry>, ApiError> {
        let token = self.bearer(cancel).await?;
        let url = format!("{}/folders/{}/items", self.base_url, folder_id);
        let mut items = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let response = self
                .transport
                .execute(cancel, |client| {
                    client
                        .get(&url)
                        .bearer_auth(&token)
                        .header("as-user", as_user)
                        .query(&[
                            ("fields", "id,name,type,size".to_string()),
                            ("limit", ITEMS_PAGE_LIMIT.to_string()),
                            ("offset", offset.to_string()),
                        ])
                })
                .await?;

            let page: ItemsPage = response
                .json()
                .await
                .map_err(|e| ApiError::Unknown(format!("failed to parse folder items: {e}")))?;

            let fetched = page.entries.len() as u64;
            items.extend(page.entries);
            offset += fetched;
            if fetched == 0 || offset >= page.total_count {
                break;
            }
        }

        Ok(items)
    }

    /// Finds a direct child by name (Box item names are case-insensitive).
    async fn find_child(
        &self,
        cancel: &CancellationToken,
        as_user: &str,
        folder_id: &str,
        name: &str,
    ) -> Result<Option<ItemEntry>, ApiError> {
        let items = self.list_folder_items(cancel, as_user, folder_id).await?;
        Ok(items.into_iter().find(|i| i.name.eq_ignore_ascii_case(name)))
    }

    /// Creates a folder, treating "already exists" as success.
    ///
    /// A 409 from a concurrent or prior creation resolves to the existing
    /// folder's id via a fresh listing.
    async fn create_folder(
        &self,
        cancel: &CancellationToken,
        as_user: &str,
        parent_id: &str,
        name: &str,
    ) -> Result<String, ApiError> {
        let token = self.bearer(cancel).await?;
        let url = format!("{}/folders", self.base_url);
        let body = serde_json::json!({ "name": name, "parent": { "id": parent_id } });

        let result = self
            .transport
            .execute(cancel, |client| {
                client
                    .post(&url)
                    .bearer_auth(&token)
                    .header("as-user", as_user)
                    .json(&body)
            })
            .await;

        match result {
            Ok(response) => {
                let created: CreatedFolder = response.json().await.map_err(|e| {
                    ApiError::Unknown(format!("failed to parse created folder: {e}"))
                })?;
                debug!(name, parent_id, id = created.id, "created folder");
                Ok(created.id)
            }
            Err(ApiError::Client { status: 409, .. }) => {
                match self.find_child(cancel, as_user, parent_id, name).await? {
                    Some(existing) if existing.is_folder() => {
                        debug!(name, parent_id, id = existing.id, "folder already existed");
                        Ok(existing.id)
                    }
                    _ => Err(ApiError::Client {
                        status: 409,
                        message: format!(
                            "name {name} is in use in folder {parent_id} but not as a folder"
                        ),
                    }),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// One multipart upload attempt; the body stream cannot be replayed,
    /// so there is no transport-level retry here.
    async fn upload_file(
        &self,
        cancel: &CancellationToken,
        as_user: &str,
        folder_id: &str,
        name: &str,
        local_path: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<RemoteEntry, ApiError> {
        let token = self.bearer(cancel).await?;

        let file = tokio::fs::File::open(local_path).await.map_err(|e| {
            ApiError::Unknown(format!("failed to open {}: {e}", local_path.display()))
        })?;
        let total = file
            .metadata()
            .await
            .map_err(|e| {
                ApiError::Unknown(format!("failed to stat {}: {e}", local_path.display()))
            })?
            .len();

        // Wrap the file stream so progress snapshots fire as bytes leave.
        let sent = Arc::new(AtomicU64::new(0));
        let started = Instant::now();
        let last_emit = Arc::new(Mutex::new(None::<Instant>));
        let progress = on_progress.clone();
        let counter = sent.clone();
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                let so_far = counter.fetch_add(bytes.len() as u64, Ordering::SeqCst)
                    + bytes.len() as u64;
                if let Some(callback) = &progress {
                    let mut last = last_emit.lock().unwrap();
                    let due = last
                        .map(|at| at.elapsed() >= UPLOAD_PROGRESS_INTERVAL)
                        .unwrap_or(true);
                    if due {
                        *last = Some(Instant::now());
                        emit_upload_progress(callback, so_far, total, started.elapsed());
                    }
                }
            }
            chunk
        });

        let attributes = serde_json::json!({
            "name": name,
            "parent": { "id": folder_id }
        })
        .to_string();
        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(stream),
            total,
        )
        .file_name(name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("attributes", attributes)
            .part("file", part);

        let send = self
            .upload_client
            .post(format!("{}/files/content", self.upload_url))
            .bearer_auth(&token)
            .header("as-user", as_user)
            .multipart(form)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            result = send => match result {
                Ok(r) => r,
                Err(e) => return Err(classify::classify_reqwest_error(&e)),
            },
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify::error_for_status(status, None, &body));
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Unknown(format!("failed to parse upload response: {e}")))?;
        let entry = uploaded
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Unknown("upload response had no entries".into()))?;

        if let Some(callback) = &on_progress {
            emit_upload_progress(callback, total, total, started.elapsed());
            callback(&TransferProgress {
                bytes_transferred: total,
                total_bytes: Some(total),
                speed_bps: 0.0,
                eta: None,
                state: TransferState::Completed,
            });
        }

        info!(name, folder_id, id = entry.id, bytes = total, "uploaded file");
        Ok(entry.into_remote())
    }
}

fn emit_upload_progress(
    callback: &ProgressCallback,
    bytes: u64,
    total: u64,
    elapsed: Duration,
) {
    let speed_bps = if elapsed.as_secs_f64() > 0.0 {
        bytes as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    let eta = if speed_bps > 0.0 && total > bytes {
        Some(Duration::from_secs_f64((total - bytes) as f64 / speed_bps))
    } else {
        None
    };
    callback(&TransferProgress {
        bytes_transferred: bytes,
        total_bytes: Some(total),
        speed_bps,
        eta,
        state: TransferState::Uploading,
    });
}

// ============================================================================
// ObjectStore implementation
// ============================================================================

#[async_trait]
impl ObjectStore for BoxClient {
    /// Resolves (or creates) the user's `zoom` folder under their root.
    async fn find_user_root(
        &self,
        cancel: &CancellationToken,
        box_email: &str,
    ) -> Result<StoreRoot, ApiError> {
        let user = self.find_user(cancel, box_email).await?;

        let folder_id = match self
            .find_child(cancel, &user.id, TOP_FOLDER_ID, ROOT_FOLDER_NAME)
            .await?
        {
            Some(existing) if existing.is_folder() => existing.id,
            Some(_) => {
                return Err(ApiError::Client {
                    status: 409,
                    message: format!(
                        "{ROOT_FOLDER_NAME} exists for {box_email} but is not a folder"
                    ),
                })
            }
            None => {
                self.create_folder(cancel, &user.id, TOP_FOLDER_ID, ROOT_FOLDER_NAME)
                    .await?
            }
        };

        debug!(user = box_email, folder_id, "resolved user root");
        Ok(StoreRoot {
            user_id: user.id,
            folder_id,
        })
    }

    async fn find_or_create_folder_path(
        &self,
        cancel: &CancellationToken,
        root: &StoreRoot,
        segments: &[String],
    ) -> Result<String, ApiError> {
        let mut current = root.folder_id.clone();
        for segment in segments {
            current = match self
                .find_child(cancel, &root.user_id, &current, segment)
                .await?
            {
                Some(existing) if existing.is_folder() => existing.id,
                Some(_) => {
                    return Err(ApiError::Client {
                        status: 409,
                        message: format!("{segment} exists but is not a folder"),
                    })
                }
                None => {
                    self.create_folder(cancel, &root.user_id, &current, segment)
                        .await?
                }
            };
        }
        Ok(current)
    }

    async fn find_child_by_name(
        &self,
        cancel: &CancellationToken,
        root: &StoreRoot,
        folder_id: &str,
        name: &str,
    ) -> Result<Option<RemoteEntry>, ApiError> {
        Ok(self
            .find_child(cancel, &root.user_id, folder_id, name)
            .await?
            .map(ItemEntry::into_remote))
    }

    async fn upload_stream(
        &self,
        cancel: &CancellationToken,
        root: &StoreRoot,
        folder_id: &str,
        name: &str,
        local_path: &Path,
    ) -> Result<RemoteEntry, ApiError> {
        self.upload_file(cancel, &root.user_id, folder_id, name, local_path, None)
            .await
    }

    async fn upload_with_progress(
        &self,
        cancel: &CancellationToken,
        root: &StoreRoot,
        folder_id: &str,
        name: &str,
        local_path: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<RemoteEntry, ApiError> {
        self.upload_file(
            cancel,
            &root.user_id,
            folder_id,
            name,
            local_path,
            on_progress,
        )
        .await
    }
}
