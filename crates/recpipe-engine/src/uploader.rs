//! Idempotent downstream placement.
//!
//! The coordinator owns the check-before-upload contract: materialize the
//! date folders, probe the target folder for a same-named child, and only
//! stream bytes when nothing is there. Every transition is recorded in the
//! Status Store before the action that depends on it; in particular, an
//! already-present remote file is recorded as a completed upload so a later
//! run can clean up locally without touching the network.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use recpipe_core::ports::{ObjectStore, StoreRoot};
use recpipe_state::StatusStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::EngineError;

/// Result of one placement call.
#[derive(Debug, Clone, Default)]
pub struct PlacedFile {
    /// Bytes were streamed this call
    pub uploaded: bool,
    /// A same-named file was already present (or the Status Store already
    /// recorded a durable placement)
    pub skipped: bool,
    /// The entry's upload backoff window has not elapsed; nothing was done
    pub deferred: bool,
    /// Remote file id, when known
    pub remote_id: Option<String>,
    /// Target folder id
    pub folder_id: Option<String>,
}

/// Coordinates uploads against the [`ObjectStore`] port.
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    status: Arc<StatusStore>,
    max_upload_attempts: u32,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        status: Arc<StatusStore>,
        max_upload_attempts: u32,
    ) -> Self {
        Self {
            store,
            status,
            max_upload_attempts,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Places `local_path` at `<root>/<segments...>/<basename>`.
    ///
    /// `status_id` names the Status Store entry to keep in step; pass
    /// `None` for generated artifacts (metadata sidecars, the audit CSV)
    /// that have no lifecycle row of their own.
    pub async fn place_file(
        &self,
        cancel: &CancellationToken,
        root: &StoreRoot,
        segments: &[String],
        local_path: &Path,
        status_id: Option<&str>,
    ) -> Result<PlacedFile, EngineError> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Status short-circuits: a durably recorded placement never uploads
        // again, and a failed entry inside its backoff window waits.
        if let Some(id) = status_id {
            if let Some(entry) = self.status.get(id).await {
                if entry.box_upload.uploaded {
                    debug!(file = name, "upload already recorded, skipping");
                    return Ok(PlacedFile {
                        skipped: true,
                        remote_id: entry.box_upload.box_file_id,
                        folder_id: entry.box_upload.box_folder_id,
                        ..PlacedFile::default()
                    });
                }
                if entry.box_upload.upload_attempts > 0
                    && !entry.upload_ready(Utc::now(), self.max_upload_attempts)
                {
                    if entry.upload_retry_exhausted(self.max_upload_attempts) {
                        warn!(
                            file = name,
                            attempts = entry.box_upload.upload_attempts,
                            "upload retry budget exhausted, leaving entry for a later run"
                        );
                    }
                    return Ok(PlacedFile {
                        deferred: true,
                        ..PlacedFile::default()
                    });
                }
            }
        }

        let folder_id = self
            .store
            .find_or_create_folder_path(cancel, root, segments)
            .await?;

        if let Some(id) = status_id {
            self.status.mark_remote_started(id, &folder_id).await?;
        }

        // Check-before-upload: an existing same-named file wins and is
        // recorded as the durable placement.
        if let Some(existing) = self
            .store
            .find_child_by_name(cancel, root, &folder_id, &name)
            .await?
        {
            info!(file = name, remote_id = existing.id, "already present downstream, skipping upload");
            if let Some(id) = status_id {
                self.status.mark_remote_completed(id, &existing.id).await?;
            }
            return Ok(PlacedFile {
                skipped: true,
                remote_id: Some(existing.id),
                folder_id: Some(folder_id),
                ..PlacedFile::default()
            });
        }

        match self
            .store
            .upload_stream(cancel, root, &folder_id, &name, local_path)
            .await
        {
            Ok(remote) => {
                if let Some(id) = status_id {
                    self.status.mark_remote_completed(id, &remote.id).await?;
                }
                Ok(PlacedFile {
                    uploaded: true,
                    remote_id: Some(remote.id),
                    folder_id: Some(folder_id),
                    ..PlacedFile::default()
                })
            }
            Err(e) => {
                if let Some(id) = status_id {
                    self.status.mark_remote_failed(id, &e.to_string()).await?;
                }
                Err(EngineError::Api(e))
            }
        }
    }
}
