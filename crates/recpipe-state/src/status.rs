//! Download Status Store.
//!
//! A durable JSON map of per-file lifecycle state ([`DownloadEntry`]) keyed
//! by stable file id. The in-memory map sits behind an RW lock; every
//! mutation rewrites the whole document via temp-file + rename before the
//! write lock is released, so the on-disk file always reflects a state the
//! pipeline actually reached and is never observed partially written.
//!
//! A missing or corrupt file on startup is tolerated: the store starts
//! empty and writes a fresh document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use recpipe_core::domain::{DownloadEntry, DownloadStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::StateError;

/// Current on-disk schema version.
const STATUS_FILE_VERSION: u32 = 1;

// ============================================================================
// StatusFile
// ============================================================================

/// The persisted document: version, write timestamp, and the entry map.
///
/// A `BTreeMap` keeps the serialized entry order stable across writes, so
/// diffs of the on-disk file show real changes only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusFile {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub downloads: BTreeMap<String, DownloadEntry>,
}

impl Default for StatusFile {
    fn default() -> Self {
        Self {
            version: STATUS_FILE_VERSION,
            last_updated: Utc::now(),
            downloads: BTreeMap::new(),
        }
    }
}

// ============================================================================
// StatusStore
// ============================================================================

/// Durable per-file state with point-in-time read snapshots.
pub struct StatusStore {
    path: PathBuf,
    inner: RwLock<StatusFile>,
}

impl StatusStore {
    /// Opens (or creates) the store at `path`.
    ///
    /// A missing file starts an empty store; an unreadable or corrupt file
    /// is logged and replaced with a fresh empty document rather than
    /// aborting the run.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let file = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<StatusFile>(&content) {
                Ok(file) => {
                    debug!(
                        path = %path.display(),
                        entries = file.downloads.len(),
                        "loaded status file"
                    );
                    file
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "status file is corrupt, starting empty"
                    );
                    StatusFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusFile::default(),
            Err(e) => return Err(StateError::io(&path, e)),
        };

        let store = Self {
            path,
            inner: RwLock::new(file),
        };
        // Make sure a readable document exists on disk from the start.
        {
            let guard = store.inner.write().await;
            store.persist(guard).await?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes the locked state and atomically replaces the file.
    ///
    /// Takes the write guard by value: the lock is held until the rename
    /// has happened, so no later mutation can be observed on disk before
    /// this one.
    async fn persist(&self, mut guard: RwLockWriteGuard<'_, StatusFile>) -> Result<(), StateError> {
        guard.last_updated = Utc::now();
        let json = serde_json::to_string_pretty(&*guard)?;

        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StateError::io(parent, e))?;
            }
        }
        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .map_err(|e| StateError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StateError::io(&self.path, e))?;
        Ok(())
    }

    // ========================================================================
    // Basic operations
    // ========================================================================

    /// Inserts or replaces an entry and makes it durable.
    pub async fn upsert(&self, entry: DownloadEntry) -> Result<(), StateError> {
        let mut guard = self.inner.write().await;
        guard.downloads.insert(entry.file_id.clone(), entry);
        self.persist(guard).await
    }

    /// Point-in-time copy of one entry.
    pub async fn get(&self, file_id: &str) -> Option<DownloadEntry> {
        self.inner.read().await.downloads.get(file_id).cloned()
    }

    /// Removes an entry; a no-op when the id is unknown.
    pub async fn remove(&self, file_id: &str) -> Result<(), StateError> {
        let mut guard = self.inner.write().await;
        if guard.downloads.remove(file_id).is_none() {
            return Ok(());
        }
        self.persist(guard).await
    }

    /// Point-in-time copy of every entry.
    pub async fn all(&self) -> Vec<DownloadEntry> {
        self.inner.read().await.downloads.values().cloned().collect()
    }

    /// Entries currently in the given status.
    pub async fn by_status(&self, status: DownloadStatus) -> Vec<DownloadEntry> {
        self.inner
            .read()
            .await
            .downloads
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect()
    }

    /// Entries whose download has not completed.
    pub async fn incomplete(&self) -> Vec<DownloadEntry> {
        self.inner
            .read()
            .await
            .downloads
            .values()
            .filter(|e| e.status != DownloadStatus::Completed)
            .cloned()
            .collect()
    }

    /// Entries downloaded locally but not yet placed downstream.
    pub async fn pending_remote_uploads(&self) -> Vec<DownloadEntry> {
        self.inner
            .read()
            .await
            .downloads
            .values()
            .filter(|e| e.status == DownloadStatus::Completed && !e.box_upload.uploaded)
            .cloned()
            .collect()
    }

    /// Entries whose last upload attempt failed.
    pub async fn failed_remote_uploads(&self) -> Vec<DownloadEntry> {
        self.inner
            .read()
            .await
            .downloads
            .values()
            .filter(|e| {
                !e.box_upload.uploaded
                    && e.box_upload
                        .upload_error
                        .as_deref()
                        .map(|s| !s.is_empty())
                        .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    // ========================================================================
    // Transition helpers
    // ========================================================================

    /// Applies a mutation to one entry and makes it durable.
    ///
    /// The closure runs under the write lock; the result is on disk before
    /// this returns, so callers may safely perform actions that depend on
    /// the transition (e.g. deleting a local file after
    /// `mark_remote_completed`).
    pub async fn update<F>(&self, file_id: &str, mutate: F) -> Result<DownloadEntry, StateError>
    where
        F: FnOnce(&mut DownloadEntry),
    {
        let mut guard = self.inner.write().await;
        let entry = guard
            .downloads
            .get_mut(file_id)
            .ok_or_else(|| StateError::UnknownEntry(file_id.to_string()))?;
        mutate(entry);
        let snapshot = entry.clone();
        self.persist(guard).await?;
        Ok(snapshot)
    }

    /// Records the start of an upload attempt into `folder_id`.
    pub async fn mark_remote_started(
        &self,
        file_id: &str,
        folder_id: &str,
    ) -> Result<(), StateError> {
        self.update(file_id, |e| e.mark_remote_started(folder_id))
            .await
            .map(|_| ())
    }

    /// Records a durable downstream placement.
    pub async fn mark_remote_completed(
        &self,
        file_id: &str,
        box_file_id: &str,
    ) -> Result<(), StateError> {
        self.update(file_id, |e| e.mark_remote_completed(box_file_id, Utc::now()))
            .await
            .map(|_| ())
    }

    /// Records a failed upload attempt.
    pub async fn mark_remote_failed(&self, file_id: &str, error: &str) -> Result<(), StateError> {
        self.update(file_id, |e| e.mark_remote_failed(error, Utc::now()))
            .await
            .map(|_| ())
    }
}
