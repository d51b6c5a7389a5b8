//! Per-user orchestration.
//!
//! One user at a time: list the full recording set first (a user with
//! nothing to migrate finishes without touching the filesystem or the
//! downstream store), then gate the expensive work on downstream root
//! reachability, then walk recordings and files serially in listing order.

use std::sync::Arc;

use chrono::NaiveDate;
use recpipe_core::config::PipelineConfig;
use recpipe_core::domain::UserEntry;
use recpipe_core::ports::{ObjectStore, RecordingSource};
use recpipe_state::{AuditWriter, StatusStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::file_task::{FileContext, FileProcessor};
use crate::uploader::UploadCoordinator;
use crate::Counters;

/// Name of the per-user audit CSV, locally and downstream.
const AUDIT_FILE_NAME: &str = "uploads.csv";

/// The result of processing one user.
#[derive(Debug, Clone)]
pub struct UserOutcome {
    pub zoom_email: String,
    pub counters: Counters,
    /// True when every file finished cleanly; drives the completion flag.
    pub completed: bool,
    /// The failure that stopped or marred the user, when any.
    pub error: Option<String>,
}

impl UserOutcome {
    fn failed(user: &UserEntry, counters: Counters, error: String) -> Self {
        Self {
            zoom_email: user.zoom_email.clone(),
            counters,
            completed: false,
            error: Some(error),
        }
    }
}

/// Processes one user's full recording set.
pub struct UserProcessor {
    source: Arc<dyn RecordingSource>,
    store: Option<Arc<dyn ObjectStore>>,
    files: FileProcessor,
    config: PipelineConfig,
}

impl UserProcessor {
    /// Builds the processor. `store` is `None` when the downstream side is
    /// disabled; files are then downloaded and kept locally only.
    pub fn new(
        source: Arc<dyn RecordingSource>,
        store: Option<Arc<dyn ObjectStore>>,
        status: Arc<StatusStore>,
        config: PipelineConfig,
    ) -> Self {
        let uploader = store.as_ref().map(|s| {
            Arc::new(UploadCoordinator::new(
                s.clone(),
                status.clone(),
                config.max_upload_attempts,
            ))
        });
        let files = FileProcessor::new(source.clone(), uploader, status, config.clone());
        Self {
            source,
            store,
            files,
            config,
        }
    }

    pub async fn process_user(
        &self,
        cancel: &CancellationToken,
        user: &UserEntry,
        from: NaiveDate,
        to: NaiveDate,
    ) -> UserOutcome {
        let mut counters = Counters::default();

        // Recordings first: a user with nothing to migrate is trivially
        // complete, and no directory or folder is created for them.
        let recordings = match self
            .source
            .list_all_recordings(cancel, &user.zoom_email, from, to)
            .await
        {
            Ok(recordings) => recordings,
            Err(e) => {
                counters.errors = 1;
                return UserOutcome::failed(user, counters, format!("listing failed: {e}"));
            }
        };

        if recordings.is_empty() {
            info!(user = user.zoom_email, "no recordings in range, user complete");
            return UserOutcome {
                zoom_email: user.zoom_email.clone(),
                counters,
                completed: true,
                error: None,
            };
        }

        // Downstream reachability is a user-scope precondition: on failure
        // no file work happens and the user stays incomplete.
        let root = match &self.store {
            Some(store) => match store.find_user_root(cancel, &user.box_email).await {
                Ok(root) => Some(root),
                Err(e) => {
                    counters.errors = 1;
                    return UserOutcome::failed(
                        user,
                        counters,
                        format!("downstream root unreachable: {e}"),
                    );
                }
            },
            None => None,
        };

        let username = match user.username() {
            Some(name) => name.to_string(),
            None => {
                counters.errors = 1;
                return UserOutcome::failed(
                    user,
                    counters,
                    format!("unusable downstream email: {}", user.box_email),
                );
            }
        };
        let audit = AuditWriter::new(
            self.config
                .base_output_dir
                .join(&username)
                .join(AUDIT_FILE_NAME),
        );

        let mut processed: u64 = 0;
        'recordings: for recording in &recordings {
            // The listing omits the short-lived download token; fetch the
            // meeting detail for it, falling back to the listing copy.
            let detailed = match self
                .source
                .get_meeting_recordings(cancel, &recording.uuid)
                .await
            {
                Ok(detail) => detail,
                Err(e) => {
                    warn!(
                        meeting = recording.uuid,
                        error = %e,
                        "meeting detail fetch failed, using listing data"
                    );
                    recording.clone()
                }
            };

            for file in &detailed.recording_files {
                if cancel.is_cancelled() {
                    return UserOutcome::failed(user, counters, "run cancelled".to_string());
                }
                if self.config.limit > 0 && processed >= self.config.limit as u64 {
                    info!(
                        user = user.zoom_email,
                        limit = self.config.limit,
                        "file limit reached, stopping user early"
                    );
                    break 'recordings;
                }

                let ctx = FileContext {
                    user,
                    root: root.as_ref(),
                    recording: &detailed,
                    file,
                    audit: &audit,
                };
                let report = self.files.process(cancel, &ctx).await;
                if report.ignored {
                    continue;
                }
                processed += 1;
                counters.merge(&report.counters);

                if let Some(error) = report.error {
                    warn!(
                        user = user.zoom_email,
                        meeting = detailed.uuid,
                        file = file.id,
                        error,
                        "file processing failed"
                    );
                    if !self.config.continue_on_error {
                        return UserOutcome::failed(user, counters, error);
                    }
                }
            }
        }

        // Place the audit CSV at the user root, outside the date folders.
        // This is best-effort: a failure here never unmarks the user.
        if counters.uploaded > 0 {
            if let (Some(store), Some(root)) = (&self.store, &root) {
                if let Err(e) = self
                    .upload_audit_csv(cancel, store.as_ref(), root, &audit)
                    .await
                {
                    warn!(user = user.zoom_email, error = %e, "failed to upload audit CSV");
                }
            }
        }

        let completed = counters.errors == 0;
        UserOutcome {
            zoom_email: user.zoom_email.clone(),
            counters,
            completed,
            error: None,
        }
    }

    /// Uploads `uploads.csv` into the user root unless a copy already
    /// exists there (downstream files are never overwritten).
    async fn upload_audit_csv(
        &self,
        cancel: &CancellationToken,
        store: &dyn ObjectStore,
        root: &recpipe_core::ports::StoreRoot,
        audit: &AuditWriter,
    ) -> Result<(), recpipe_core::domain::ApiError> {
        if !tokio::fs::try_exists(audit.path()).await.unwrap_or(false) {
            return Ok(());
        }
        let existing = store
            .find_child_by_name(cancel, root, &root.folder_id, AUDIT_FILE_NAME)
            .await?;
        if existing.is_some() {
            info!("audit CSV already present downstream, leaving it in place");
            return Ok(());
        }
        store
            .upload_stream(cancel, root, &root.folder_id, AUDIT_FILE_NAME, audit.path())
            .await?;
        Ok(())
    }
}
