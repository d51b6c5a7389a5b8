//! Downstream object store port (driven/secondary port).
//!
//! The uploader depends on a narrow surface: resolve a user's root folder,
//! materialize date folders under it, check a folder for a same-named child
//! (the idempotency probe), and stream a file up. Implementations never
//! overwrite: an upload into a folder that already holds the name is a
//! caller bug, guarded by [`ObjectStore::find_child_by_name`].

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::ApiError;

use super::recording_source::ProgressCallback;

/// A resolved per-user root in the downstream store.
///
/// Downstream operations on a user's content must be performed in that
/// user's context, so the root carries the user id alongside the folder id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRoot {
    /// Downstream user id the folder belongs to
    pub user_id: String,
    /// Folder id of the user's migration root
    pub folder_id: String,
}

/// A file or folder observed in the downstream store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    /// Byte size for files; `None` for folders
    pub size: Option<u64>,
}

/// Port trait for the downstream object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Resolves the migration root folder for `box_email`.
    ///
    /// Failure here is a precondition failure for the whole user: the
    /// per-user orchestrator does no file work when the root cannot be
    /// reached.
    async fn find_user_root(
        &self,
        cancel: &CancellationToken,
        box_email: &str,
    ) -> Result<StoreRoot, ApiError>;

    /// Materializes a folder path under the root, creating missing
    /// segments, and returns the leaf folder id. Segment creation treats
    /// "already exists" as success.
    async fn find_or_create_folder_path(
        &self,
        cancel: &CancellationToken,
        root: &StoreRoot,
        segments: &[String],
    ) -> Result<String, ApiError>;

    /// Looks for a child named `name` directly under `folder_id`.
    async fn find_child_by_name(
        &self,
        cancel: &CancellationToken,
        root: &StoreRoot,
        folder_id: &str,
        name: &str,
    ) -> Result<Option<RemoteEntry>, ApiError>;

    /// Streams `local_path` into `folder_id` as `name`.
    async fn upload_stream(
        &self,
        cancel: &CancellationToken,
        root: &StoreRoot,
        folder_id: &str,
        name: &str,
        local_path: &Path,
    ) -> Result<RemoteEntry, ApiError>;

    /// Like [`ObjectStore::upload_stream`], reporting progress snapshots.
    async fn upload_with_progress(
        &self,
        cancel: &CancellationToken,
        root: &StoreRoot,
        folder_id: &str,
        name: &str,
        local_path: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<RemoteEntry, ApiError>;
}
