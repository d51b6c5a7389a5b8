//! Durable per-file lifecycle state.
//!
//! A [`DownloadEntry`] is one row of the Status Store: everything the
//! pipeline knows about a single recording file's journey from "listed" to
//! "uploaded downstream". Entries are created lazily on first processing and
//! kept after success as an audit of what happened.
//!
//! State transitions live here so the persistence layer stays a dumb
//! durable map; the rules for when a download may resume and when an upload
//! may be retried are pure functions of the entry.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// DownloadStatus
// ============================================================================

/// Lifecycle state of a single file download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Known but not yet attempted
    Pending,
    /// A download attempt is (or was) in flight
    Downloading,
    /// All bytes are on local disk
    Completed,
    /// The last attempt failed; a partial file may remain for resume
    Failed,
    /// Deliberately paused by an operator
    Paused,
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Paused => "paused",
        };
        f.write_str(s)
    }
}

// ============================================================================
// DownloadMetadata
// ============================================================================

/// Well-known context attached to a download entry.
///
/// The keys the pipeline actually inspects are typed fields; anything else
/// an operator or future version wants to attach goes into `extras`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Free-form string pairs not interpreted by the pipeline
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
}

// ============================================================================
// BoxUploadInfo
// ============================================================================

/// Downstream placement state nested in a [`DownloadEntry`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxUploadInfo {
    /// True once the file is durably present downstream
    pub uploaded: bool,
    /// Remote file id (set when uploaded, or when found already present)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_file_id: Option<String>,
    /// Remote parent folder id the upload targeted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_folder_id: Option<String>,
    /// Number of upload attempts made so far
    #[serde(default)]
    pub upload_attempts: u32,
    /// When the last upload attempt finished (success or failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Message of the last upload failure, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_error: Option<String>,
}

// ============================================================================
// DownloadEntry
// ============================================================================

/// Durable lifecycle row for one recording file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadEntry {
    /// Stable key: `<recording-id>-<recording-file-id>`
    pub file_id: String,
    /// Target path on local disk
    pub local_path: PathBuf,
    /// Size the upstream reported (0 when unknown)
    #[serde(default)]
    pub expected_size: u64,
    /// Bytes currently on local disk
    #[serde(default)]
    pub downloaded_size: u64,
    /// Download lifecycle state
    pub status: DownloadStatus,
    /// Download attempts made so far
    #[serde(default)]
    pub retry_count: u32,
    /// SHA-256 of the completed local file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_sha256: Option<String>,
    /// When the most recent download attempt started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
    /// When the first download attempt started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the download completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Context for operators inspecting the store
    #[serde(default)]
    pub metadata: DownloadMetadata,
    /// Downstream placement state
    #[serde(default)]
    pub box_upload: BoxUploadInfo,
}

impl DownloadEntry {
    /// Creates a fresh pending entry.
    pub fn new(file_id: impl Into<String>, local_path: PathBuf, expected_size: u64) -> Self {
        Self {
            file_id: file_id.into(),
            local_path,
            expected_size,
            downloaded_size: 0,
            status: DownloadStatus::Pending,
            retry_count: 0,
            checksum_sha256: None,
            last_attempt: None,
            started_at: None,
            completed_at: None,
            metadata: DownloadMetadata::default(),
            box_upload: BoxUploadInfo::default(),
        }
    }

    /// Attaches metadata, builder-style.
    pub fn with_metadata(mut self, metadata: DownloadMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    // ========================================================================
    // Download transitions
    // ========================================================================

    /// Records the start of a download attempt.
    pub fn mark_downloading(&mut self, now: DateTime<Utc>) {
        self.status = DownloadStatus::Downloading;
        self.last_attempt = Some(now);
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.retry_count += 1;
    }

    /// Records a completed download.
    pub fn mark_completed(&mut self, bytes: u64, checksum: Option<String>, now: DateTime<Utc>) {
        self.status = DownloadStatus::Completed;
        self.downloaded_size = bytes;
        self.checksum_sha256 = checksum;
        self.completed_at = Some(now);
    }

    /// Records a failed download attempt, keeping the partial byte count.
    pub fn mark_failed(&mut self, bytes_on_disk: u64, now: DateTime<Utc>) {
        self.status = DownloadStatus::Failed;
        self.downloaded_size = bytes_on_disk;
        self.last_attempt = Some(now);
    }

    // ========================================================================
    // Resume policy
    // ========================================================================

    /// Whether a new run should (re)start this download.
    ///
    /// Pending, failed, and paused entries always resume. A `downloading`
    /// entry resumes only when its last attempt is older than `stale_after`
    /// (the in-flight marker was left behind by a crashed process).
    /// Completed entries never resume.
    pub fn should_resume(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        match self.status {
            DownloadStatus::Pending | DownloadStatus::Failed | DownloadStatus::Paused => true,
            DownloadStatus::Completed => false,
            DownloadStatus::Downloading => match self.last_attempt {
                Some(last) => {
                    let age = now.signed_duration_since(last);
                    age.to_std().map(|a| a > stale_after).unwrap_or(false)
                }
                None => true,
            },
        }
    }

    /// Byte offset the next attempt should start from.
    ///
    /// For a completed entry this returns `expected_size`, signalling that
    /// there is nothing left to fetch.
    pub fn resume_offset(&self) -> u64 {
        if self.status == DownloadStatus::Completed {
            self.expected_size
        } else {
            self.downloaded_size
        }
    }

    // ========================================================================
    // Upload transitions
    // ========================================================================

    /// Records the start of an upload attempt into `folder_id`.
    pub fn mark_remote_started(&mut self, folder_id: &str) {
        self.box_upload.box_folder_id = Some(folder_id.to_string());
        self.box_upload.upload_attempts += 1;
    }

    /// Records a durable downstream placement (fresh upload or an
    /// already-present file observed by the existence check).
    pub fn mark_remote_completed(&mut self, box_file_id: &str, now: DateTime<Utc>) {
        self.box_upload.uploaded = true;
        self.box_upload.box_file_id = Some(box_file_id.to_string());
        self.box_upload.uploaded_at = Some(now);
        self.box_upload.upload_error = None;
    }

    /// Records a failed upload attempt.
    pub fn mark_remote_failed(&mut self, error: &str, now: DateTime<Utc>) {
        self.box_upload.uploaded = false;
        self.box_upload.upload_error = Some(error.to_string());
        self.box_upload.uploaded_at = Some(now);
    }

    // ========================================================================
    // Upload retry pacing
    // ========================================================================

    /// Whether another upload attempt is allowed right now.
    ///
    /// Failed uploads back off by `attempts²` minutes from the last attempt
    /// and stop entirely once `max_attempts` is reached (the entry is then
    /// left for a later run or operator intervention).
    pub fn upload_ready(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        if self.box_upload.uploaded {
            return false;
        }
        if self.box_upload.upload_attempts >= max_attempts {
            return false;
        }
        if self.box_upload.upload_error.is_none() {
            return true;
        }
        match self.box_upload.uploaded_at {
            Some(last) => {
                let attempts = self.box_upload.upload_attempts as i64;
                let pause = chrono::Duration::minutes(attempts * attempts);
                now.signed_duration_since(last) >= pause
            }
            None => true,
        }
    }

    /// True once the upload retry budget is spent.
    pub fn upload_retry_exhausted(&self, max_attempts: u32) -> bool {
        !self.box_upload.uploaded && self.box_upload.upload_attempts >= max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> DownloadEntry {
        DownloadEntry::new("rec-1-file-1", PathBuf::from("/tmp/out/file.mp4"), 1024)
    }

    #[test]
    fn test_new_entry_is_pending() {
        let e = entry();
        assert_eq!(e.status, DownloadStatus::Pending);
        assert_eq!(e.downloaded_size, 0);
        assert!(!e.box_upload.uploaded);
    }

    #[test]
    fn test_download_transitions() {
        let mut e = entry();
        let t0 = Utc::now();
        e.mark_downloading(t0);
        assert_eq!(e.status, DownloadStatus::Downloading);
        assert_eq!(e.retry_count, 1);
        assert_eq!(e.started_at, Some(t0));

        e.mark_completed(1024, Some("abc".into()), t0);
        assert_eq!(e.status, DownloadStatus::Completed);
        assert_eq!(e.downloaded_size, e.expected_size);
        assert_eq!(e.checksum_sha256.as_deref(), Some("abc"));
    }

    #[test]
    fn test_should_resume_by_status() {
        let now = Utc::now();
        let stale = Duration::from_secs(300);

        let mut e = entry();
        assert!(e.should_resume(now, stale)); // pending

        e.status = DownloadStatus::Failed;
        assert!(e.should_resume(now, stale));

        e.status = DownloadStatus::Paused;
        assert!(e.should_resume(now, stale));

        e.status = DownloadStatus::Completed;
        assert!(!e.should_resume(now, stale));
    }

    #[test]
    fn test_should_resume_stale_downloading() {
        let now = Utc::now();
        let stale = Duration::from_secs(300);

        let mut e = entry();
        e.status = DownloadStatus::Downloading;
        e.last_attempt = Some(now - chrono::Duration::seconds(30));
        assert!(!e.should_resume(now, stale)); // a live process owns it

        e.last_attempt = Some(now - chrono::Duration::seconds(600));
        assert!(e.should_resume(now, stale)); // stale marker from a crash
    }

    #[test]
    fn test_resume_offset() {
        let mut e = entry();
        e.downloaded_size = 512;
        e.status = DownloadStatus::Failed;
        assert_eq!(e.resume_offset(), 512);

        e.status = DownloadStatus::Completed;
        assert_eq!(e.resume_offset(), 1024);
    }

    #[test]
    fn test_resume_offset_never_exceeds_expected_when_resumable() {
        let mut e = entry();
        e.status = DownloadStatus::Failed;
        e.downloaded_size = 1000;
        assert!(e.resume_offset() <= e.expected_size);
    }

    #[test]
    fn test_upload_transitions() {
        let now = Utc::now();
        let mut e = entry();
        e.mark_remote_started("folder-9");
        assert_eq!(e.box_upload.upload_attempts, 1);
        assert_eq!(e.box_upload.box_folder_id.as_deref(), Some("folder-9"));

        e.mark_remote_failed("503 from upload host", now);
        assert!(!e.box_upload.uploaded);
        assert!(e.box_upload.upload_error.is_some());

        e.mark_remote_completed("file-77", now);
        assert!(e.box_upload.uploaded);
        assert_eq!(e.box_upload.box_file_id.as_deref(), Some("file-77"));
        assert!(e.box_upload.upload_error.is_none());
    }

    #[test]
    fn test_upload_backoff_is_quadratic() {
        let now = Utc::now();
        let mut e = entry();

        // Two failed attempts: pause is 2² = 4 minutes.
        e.mark_remote_started("f");
        e.mark_remote_started("f");
        e.mark_remote_failed("boom", now - chrono::Duration::minutes(3));
        assert!(!e.upload_ready(now, 5));

        e.mark_remote_failed("boom", now - chrono::Duration::minutes(5));
        assert!(e.upload_ready(now, 5));
    }

    #[test]
    fn test_upload_retry_cap() {
        let now = Utc::now();
        let mut e = entry();
        for _ in 0..5 {
            e.mark_remote_started("f");
        }
        e.mark_remote_failed("boom", now - chrono::Duration::hours(2));
        assert!(!e.upload_ready(now, 5));
        assert!(e.upload_retry_exhausted(5));
        assert!(!e.upload_retry_exhausted(6));
    }

    #[test]
    fn test_uploaded_entry_not_ready() {
        let now = Utc::now();
        let mut e = entry();
        e.mark_remote_completed("file-1", now);
        assert!(!e.upload_ready(now, 5));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut e = entry();
        e.mark_downloading(Utc::now());
        e.metadata.user_email = Some("a@b.c".into());
        e.metadata
            .extras
            .insert("origin".into(), "listing".into());

        let json = serde_json::to_string_pretty(&e).unwrap();
        let back: DownloadEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(e, back);
    }
}
