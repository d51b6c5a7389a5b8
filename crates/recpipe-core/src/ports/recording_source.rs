//! Upstream recording source port (driven/secondary port).
//!
//! The orchestrators need exactly three capabilities from the upstream
//! conferencing service: list a user's recordings over a date range, fetch
//! one meeting's detail, and stream one file to local disk. The transfer
//! DTOs here are port-level types; the durable lifecycle row
//! ([`crate::domain::DownloadEntry`]) is a domain entity maintained by the
//! callers, not by implementations of this trait.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use crate::domain::download::DownloadMetadata;
use crate::domain::errors::ApiError;
use crate::domain::recording::Recording;

// ============================================================================
// Transfer DTOs
// ============================================================================

/// Phase of a transfer as reported to progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Downloading,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

/// Progress snapshot delivered to [`ProgressCallback`]s.
///
/// Emitted at most every 500 ms while bytes are moving, plus a final
/// snapshot with a terminal state.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Bytes moved so far (including any resumed prefix)
    pub bytes_transferred: u64,
    /// Total size when known
    pub total_bytes: Option<u64>,
    /// Observed transfer speed in bytes per second
    pub speed_bps: f64,
    /// Estimated time remaining, when the total is known and speed is nonzero
    pub eta: Option<Duration>,
    /// Current phase
    pub state: TransferState,
}

/// Callback invoked with transfer progress snapshots.
pub type ProgressCallback = Arc<dyn Fn(&TransferProgress) + Send + Sync>;

/// A request to place a remote object at a local path.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Source URL
    pub url: String,
    /// Destination path on local disk
    pub destination: PathBuf,
    /// Expected size when the listing reported one
    pub expected_size: Option<u64>,
    /// Short-lived download token to use as the bearer credential.
    ///
    /// When absent, implementations fall back to their own OAuth token.
    pub bearer_token: Option<String>,
    /// Extra request headers
    pub headers: Vec<(String, String)>,
    /// Context carried through to progress reporting and bookkeeping
    pub metadata: DownloadMetadata,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, destination: PathBuf) -> Self {
        Self {
            url: url.into(),
            destination,
            expected_size: None,
            bearer_token: None,
            headers: Vec::new(),
            metadata: DownloadMetadata::default(),
        }
    }
}

/// Result of a download, successful or not.
///
/// The downloader never panics a pipeline run: failures are carried in
/// `error` with `success == false`, leaving any partial file on disk for a
/// later resume.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// Bytes written by this call (not counting a resumed prefix)
    pub bytes_downloaded: u64,
    /// Wall-clock duration of the whole call, retries included
    pub duration: Duration,
    /// Average speed over `duration`, bytes per second
    pub average_speed_bps: f64,
    /// True when the call continued from a non-empty partial file
    pub resumed: bool,
    /// Number of attempts beyond the first
    pub retry_count: u32,
    /// True when the destination now holds the complete object
    pub success: bool,
    /// The final classified error when `success` is false
    pub error: Option<ApiError>,
}

impl DownloadOutcome {
    /// True when the failure was a cancellation rather than an error.
    pub fn is_cancelled(&self) -> bool {
        self.error.as_ref().map(ApiError::is_cancelled).unwrap_or(false)
    }
}

// ============================================================================
// RecordingSource
// ============================================================================

/// Port trait for the upstream conferencing service.
#[async_trait]
pub trait RecordingSource: Send + Sync {
    /// Lists every meeting with recordings for `user_email` in `[from, to]`,
    /// sharding the range around the upstream's one-month window limit.
    ///
    /// A failure on any chunk aborts the whole listing; partial results are
    /// never returned.
    async fn list_all_recordings(
        &self,
        cancel: &CancellationToken,
        user_email: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Recording>, ApiError>;

    /// Fetches one meeting's recording detail, including the short-lived
    /// download access token.
    async fn get_meeting_recordings(
        &self,
        cancel: &CancellationToken,
        meeting_uuid: &str,
    ) -> Result<Recording, ApiError>;

    /// Streams `request.url` to `request.destination` with resume support.
    async fn download_stream(
        &self,
        cancel: &CancellationToken,
        request: DownloadRequest,
        on_progress: Option<ProgressCallback>,
    ) -> DownloadOutcome;
}
