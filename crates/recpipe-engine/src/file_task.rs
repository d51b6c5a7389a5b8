//! Per-file orchestration.
//!
//! Drives one recording file from "listed" to "uploaded and locally
//! cleaned up": plan paths, download (or resume), place downstream, write
//! the audit row, persist and place the JSON metadata sidecar, and delete
//! local copies once their downstream placement is durable.
//!
//! Timing: the audit row for a primary file records the wall clock from
//! download start to the moment the placement call returns. Sidecar work
//! happens after that measurement and is audited with a processing time of
//! zero so metadata never inflates a file's numbers.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use recpipe_core::config::PipelineConfig;
use recpipe_core::domain::{paths, DownloadMetadata, DownloadEntry, Recording, RecordingFile};
use recpipe_core::domain::{DownloadStatus, UserEntry};
use recpipe_core::ports::{DownloadRequest, RecordingSource, StoreRoot};
use recpipe_state::{AuditRow, AuditWriter, StatusStore};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::uploader::UploadCoordinator;
use crate::{Counters, EngineError};

/// Everything the processor needs to know about one file's surroundings.
pub struct FileContext<'a> {
    pub user: &'a UserEntry,
    pub root: Option<&'a StoreRoot>,
    pub recording: &'a Recording,
    pub file: &'a RecordingFile,
    pub audit: &'a AuditWriter,
}

/// What happened to one file.
#[derive(Debug, Clone, Default)]
pub struct FileReport {
    pub counters: Counters,
    pub error: Option<String>,
    /// True when the file was skipped without any counter movement (an
    /// empty download URL).
    pub ignored: bool,
}

impl FileReport {
    fn failed(message: String) -> Self {
        let mut report = FileReport::default();
        report.counters.errors = 1;
        report.error = Some(message);
        report
    }
}

/// Sequences download → upload → audit → sidecar → local delete for one
/// recording file.
pub struct FileProcessor {
    source: Arc<dyn RecordingSource>,
    uploader: Option<Arc<UploadCoordinator>>,
    status: Arc<StatusStore>,
    config: PipelineConfig,
}

impl FileProcessor {
    pub fn new(
        source: Arc<dyn RecordingSource>,
        uploader: Option<Arc<UploadCoordinator>>,
        status: Arc<StatusStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            uploader,
            status,
            config,
        }
    }

    pub async fn process(&self, cancel: &CancellationToken, ctx: &FileContext<'_>) -> FileReport {
        let mut report = FileReport::default();
        let file_type = ctx.file.file_type;

        // A recording file without a download URL is not downloadable yet;
        // skip it without touching any counter.
        if ctx.file.download_url.is_empty() {
            debug!(
                meeting = ctx.recording.uuid,
                file = ctx.file.id,
                "no download URL, skipping"
            );
            report.ignored = true;
            return report;
        }

        // Meta-only runs move no bytes for non-media types at all.
        if self.config.meta_only && !file_type.is_media() {
            report.counters.skipped = 1;
            return report;
        }

        let local = match paths::local_path(
            &self.config.base_output_dir,
            &ctx.user.box_email,
            ctx.recording,
            file_type,
        ) {
            Ok(p) => p,
            Err(e) => return FileReport::failed(e.to_string()),
        };
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.config.dry_run {
            info!(
                file = file_name,
                meeting = ctx.recording.topic,
                "dry run: would download and upload"
            );
            report.counters.downloaded = 1;
            return report;
        }

        let file_id = ctx.file.stable_id(&ctx.recording.uuid);
        let started = Instant::now();

        // ------------------------------------------------------------------
        // Download
        // ------------------------------------------------------------------
        if !self.config.meta_only {
            match self.download_phase(cancel, ctx, &file_id, &local).await {
                Ok(DownloadPhase::Downloaded) => report.counters.downloaded = 1,
                Ok(DownloadPhase::SkippedLocal) => report.counters.skipped = 1,
                Err(e) => return FileReport::failed(e),
            }
        }

        // ------------------------------------------------------------------
        // Upload + audit (primary)
        // ------------------------------------------------------------------
        let mut primary_placed_ok = false;
        if !self.config.meta_only {
            if let (Some(uploader), Some(root)) = (&self.uploader, ctx.root) {
                let segments = paths::remote_segments(ctx.recording);
                let placed = uploader
                    .place_file(cancel, root, &segments, &local, Some(&file_id))
                    .await;
                // Everything after this point is metadata work; the
                // primary file's processing time stops here.
                let processing_ms = started.elapsed().as_millis() as u64;

                match placed {
                    Ok(p) if p.deferred => {
                        warn!(file = file_name, "upload deferred by backoff");
                        report.counters.skipped += 1;
                    }
                    Ok(p) => {
                        if p.uploaded {
                            report.counters.uploaded = 1;
                        }
                        primary_placed_ok = true;
                        let size = file_size_of(&local, ctx.file.size_or_zero()).await;
                        self.append_audit(ctx, &file_name, size, processing_ms).await;
                    }
                    Err(e) => {
                        // The local file stays put; the entry keeps its
                        // failure for backoff pacing.
                        return FileReport::failed(e.to_string());
                    }
                }
            }
        }

        // ------------------------------------------------------------------
        // Metadata sidecar (primary media only)
        // ------------------------------------------------------------------
        let mut sidecar_placed_ok = false;
        let sidecar = paths::sidecar_path(&local);
        if file_type.is_media() {
            if let Err(e) = self.write_sidecar(ctx, &sidecar).await {
                return FileReport::failed(e.to_string());
            }

            if let (Some(uploader), Some(root)) = (&self.uploader, ctx.root) {
                let segments = paths::remote_segments(ctx.recording);
                match uploader
                    .place_file(cancel, root, &segments, &sidecar, None)
                    .await
                {
                    Ok(p) if p.deferred => {}
                    Ok(p) => {
                        sidecar_placed_ok = true;
                        if p.uploaded {
                            report.counters.uploaded += 1;
                        }
                        let size = file_size_of(&sidecar, 0).await;
                        let sidecar_name = sidecar
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        // Metadata uploads never inflate timings.
                        self.append_audit(ctx, &sidecar_name, size, 0).await;
                    }
                    Err(e) => return FileReport::failed(e.to_string()),
                }
            }
        }

        // ------------------------------------------------------------------
        // Local cleanup
        // ------------------------------------------------------------------
        if self.config.delete_after_upload {
            if primary_placed_ok {
                match tokio::fs::remove_file(&local).await {
                    Ok(()) => report.counters.deleted += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(file = file_name, error = %e, "failed to delete local file"),
                }
            }
            if sidecar_placed_ok {
                match tokio::fs::remove_file(&sidecar).await {
                    Ok(()) => report.counters.deleted += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(error = %e, "failed to delete local sidecar"),
                }
            }
        }

        report
    }

    /// Decides between resuming a download, starting fresh, and trusting
    /// what is already on disk, then runs the transfer.
    async fn download_phase(
        &self,
        cancel: &CancellationToken,
        ctx: &FileContext<'_>,
        file_id: &str,
        local: &Path,
    ) -> Result<DownloadPhase, String> {
        let expected = ctx.file.size_or_zero();
        let stale_after = std::time::Duration::from_secs(self.config.stale_download_secs);

        let entry = match self.status.get(file_id).await {
            Some(existing) => existing,
            None => {
                let entry = DownloadEntry::new(file_id, local.to_path_buf(), expected)
                    .with_metadata(DownloadMetadata {
                        user_email: Some(ctx.user.zoom_email.clone()),
                        meeting_id: Some(ctx.recording.uuid.clone()),
                        meeting_topic: Some(ctx.recording.topic.clone()),
                        file_type: Some(ctx.file.file_type.to_string()),
                        filename: local
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned()),
                        extras: Default::default(),
                    });
                self.status
                    .upsert(entry.clone())
                    .await
                    .map_err(|e| e.to_string())?;
                entry
            }
        };

        if entry.status == DownloadStatus::Completed {
            debug!(file_id, "download already completed, skipping");
            return Ok(DownloadPhase::SkippedLocal);
        }

        let on_disk = tokio::fs::metadata(local).await.map(|m| m.len()).ok();
        if let Some(size) = on_disk {
            // A local file of exactly the expected size predates (or
            // outlived) the status entry: adopt it instead of re-fetching.
            if expected > 0 && size == expected {
                self.status
                    .update(file_id, |e| e.mark_completed(size, None, Utc::now()))
                    .await
                    .map_err(|e| e.to_string())?;
                return Ok(DownloadPhase::SkippedLocal);
            }
        }

        if entry.status == DownloadStatus::Downloading
            && !entry.should_resume(Utc::now(), stale_after)
        {
            // Another process owns this download and its marker is fresh.
            return Err(format!("download of {file_id} is already in flight"));
        }

        self.status
            .update(file_id, |e| e.mark_downloading(Utc::now()))
            .await
            .map_err(|e| e.to_string())?;

        let mut request = DownloadRequest::new(ctx.file.download_url.clone(), local.to_path_buf());
        request.expected_size = (expected > 0).then_some(expected);
        request.bearer_token = ctx.recording.download_access_token.clone();
        request.metadata = entry.metadata.clone();

        let progress: Option<recpipe_core::ports::ProgressCallback> = if self.config.verbose {
            let name = file_id.to_string();
            Some(Arc::new(
                move |p: &recpipe_core::ports::TransferProgress| {
                    debug!(
                        file = name,
                        bytes = p.bytes_transferred,
                        total = p.total_bytes,
                        speed_bps = p.speed_bps as u64,
                        "download progress"
                    );
                },
            ))
        } else {
            None
        };

        let outcome = self
            .source
            .download_stream(cancel, request, progress)
            .await;

        let bytes_on_disk = tokio::fs::metadata(local).await.map(|m| m.len()).unwrap_or(0);

        if outcome.success {
            let checksum = match sha256_file(local).await {
                Ok(digest) => Some(digest),
                Err(e) => {
                    warn!(file_id, error = %e, "failed to checksum downloaded file");
                    None
                }
            };
            self.status
                .update(file_id, |e| {
                    e.mark_completed(bytes_on_disk, checksum, Utc::now())
                })
                .await
                .map_err(|e| e.to_string())?;
            info!(
                file_id,
                bytes = bytes_on_disk,
                resumed = outcome.resumed,
                retries = outcome.retry_count,
                "downloaded"
            );
            Ok(DownloadPhase::Downloaded)
        } else {
            // Keep the partial file; the entry's failed state makes the
            // next run resume from this offset.
            self.status
                .update(file_id, |e| e.mark_failed(bytes_on_disk, Utc::now()))
                .await
                .map_err(|e| e.to_string())?;
            let message = outcome
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "download failed".to_string());
            Err(message)
        }
    }

    /// Writes the JSON metadata sidecar when it does not already exist.
    async fn write_sidecar(
        &self,
        ctx: &FileContext<'_>,
        sidecar: &Path,
    ) -> Result<(), EngineError> {
        if tokio::fs::try_exists(sidecar).await.unwrap_or(false) {
            return Ok(());
        }

        let recording = ctx.recording;
        let file = ctx.file;
        let document = serde_json::json!({
            "meeting": {
                "uuid": recording.uuid,
                "id": recording.id,
                "account_id": recording.account_id,
                "host_id": recording.host_id,
                "topic": recording.topic,
                "type": recording.meeting_type,
                "start_time": recording.start_time.to_rfc3339(),
                "duration": recording.duration,
                "total_size": recording.total_size,
            },
            "recording_file": {
                "id": file.id,
                "meeting_id": file.meeting_id,
                "recording_start": file.recording_start.map(|t| t.to_rfc3339()),
                "recording_end": file.recording_end.map(|t| t.to_rfc3339()),
                "file_type": file.file_type.to_string(),
                "file_extension": file.file_extension,
                "file_size": file.file_size,
                "download_url": file.download_url,
                "play_url": file.play_url,
                "status": file.status,
                "recording_type": file.recording_type,
            },
        });

        if let Some(parent) = sidecar.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let pretty = serde_json::to_string_pretty(&document)
            .map_err(|e| EngineError::State(e.into()))?;
        tokio::fs::write(sidecar, pretty.as_bytes()).await?;
        debug!(path = %sidecar.display(), "wrote metadata sidecar");
        Ok(())
    }

    /// Appends an audit row; failures are logged, never propagated.
    async fn append_audit(&self, ctx: &FileContext<'_>, name: &str, size: u64, ms: u64) {
        let row = AuditRow {
            zoom_user: ctx.user.zoom_email.clone(),
            file_name: name.to_string(),
            file_size_bytes: size,
            upload_date: Utc::now(),
            processing_time_ms: ms,
        };
        if let Err(e) = ctx.audit.append(&row).await {
            warn!(file = name, error = %e, "failed to append audit row");
        }
    }
}

enum DownloadPhase {
    Downloaded,
    SkippedLocal,
}

/// Size of the local file, falling back to the listed size when the file
/// is already gone.
async fn file_size_of(path: &Path, fallback: u64) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .unwrap_or(fallback)
}

/// Streaming SHA-256 of a local file, hex-encoded.
async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}
