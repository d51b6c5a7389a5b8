//! Ranged downloader with resume and progress reporting.
//!
//! Places a remote object at a local path. A non-empty destination is
//! treated as a partial download: the request carries a `Range` header
//! starting after the last byte on disk, and a server that answers 200
//! instead of 206 (no range support) restarts the file from zero. Progress
//! callbacks fire at most every 500 ms plus once at the end.
//!
//! The downloader manages its own retry envelope (each attempt re-reads the
//! on-disk length, so a failed attempt's bytes are kept and resumed); the
//! typed backoff of the retry transport is not involved because every
//! attempt here starts from a different offset.

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use recpipe_core::domain::ApiError;
use recpipe_core::ports::{
    DownloadOutcome, DownloadRequest, ProgressCallback, TransferProgress, TransferState,
};
use recpipe_http::classify;
use reqwest::StatusCode;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Downloader tuning knobs.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Attempts beyond the first (0 = single attempt)
    pub max_retries: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    /// Minimum interval between progress callbacks
    pub progress_interval: Duration,
    /// Write buffer capacity
    pub write_buffer: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            progress_interval: Duration::from_millis(500),
            write_buffer: 64 * 1024,
        }
    }
}

/// Counters produced by one attempt.
#[derive(Debug, Clone, Copy, Default)]
struct AttemptStats {
    bytes_written: u64,
    resumed: bool,
}

// ============================================================================
// RangedDownloader
// ============================================================================

/// Streams URLs to local files with resume support.
pub struct RangedDownloader {
    client: reqwest::Client,
    config: DownloaderConfig,
}

impl RangedDownloader {
    /// Builds a downloader over the given client.
    ///
    /// The client should have no overall request timeout; download streams
    /// run for as long as the outer cancellation context allows.
    pub fn new(client: reqwest::Client, config: DownloaderConfig) -> Self {
        Self { client, config }
    }

    /// Outcome for a failure that happened before any byte moved.
    pub fn failed_outcome(&self, error: ApiError) -> DownloadOutcome {
        DownloadOutcome {
            bytes_downloaded: 0,
            duration: Duration::ZERO,
            average_speed_bps: 0.0,
            resumed: false,
            retry_count: 0,
            success: false,
            error: Some(error),
        }
    }

    /// Downloads `request.url` to `request.destination`.
    ///
    /// Never returns `Err`: failures are reported in the outcome with
    /// `success == false`, leaving any partial file in place for a later
    /// resume. Cancellation flushes the last whole chunk before returning.
    pub async fn download(
        &self,
        cancel: &CancellationToken,
        request: &DownloadRequest,
        on_progress: Option<ProgressCallback>,
    ) -> DownloadOutcome {
        let started = Instant::now();
        let mut total_written: u64 = 0;
        let mut resumed = false;
        let mut retry_count: u32 = 0;
        let mut last_error: Option<ApiError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                retry_count += 1;
                let interrupted = tokio::select! {
                    _ = cancel.cancelled() => true,
                    _ = tokio::time::sleep(self.config.retry_delay) => false,
                };
                if interrupted {
                    last_error = Some(ApiError::Cancelled);
                    break;
                }
                debug!(url = request.url, attempt, "retrying download");
            }

            match self.attempt(cancel, request, on_progress.as_ref()).await {
                Ok(stats) => {
                    total_written += stats.bytes_written;
                    resumed |= stats.resumed;
                    let duration = started.elapsed();
                    emit(
                        on_progress.as_ref(),
                        total_written,
                        request.expected_size,
                        duration,
                        TransferState::Completed,
                    );
                    return DownloadOutcome {
                        bytes_downloaded: total_written,
                        duration,
                        average_speed_bps: speed(total_written, duration),
                        resumed,
                        retry_count,
                        success: true,
                        error: None,
                    };
                }
                Err((error, stats)) => {
                    total_written += stats.bytes_written;
                    resumed |= stats.resumed;
                    let cancelled = error.is_cancelled();
                    warn!(url = request.url, attempt, error = %error, "download attempt failed");
                    last_error = Some(error);
                    if cancelled {
                        break;
                    }
                }
            }
        }

        let duration = started.elapsed();
        let error = last_error
            .unwrap_or_else(|| ApiError::Unknown("download produced no attempts".into()));
        let state = if error.is_cancelled() {
            TransferState::Cancelled
        } else {
            TransferState::Failed
        };
        emit(
            on_progress.as_ref(),
            total_written,
            request.expected_size,
            duration,
            state,
        );
        DownloadOutcome {
            bytes_downloaded: total_written,
            duration,
            average_speed_bps: speed(total_written, duration),
            resumed,
            retry_count,
            success: false,
            error: Some(error),
        }
    }

    /// One attempt: stat the partial file, send a (possibly ranged) GET,
    /// and stream the body to disk.
    async fn attempt(
        &self,
        cancel: &CancellationToken,
        request: &DownloadRequest,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<AttemptStats, (ApiError, AttemptStats)> {
        let mut stats = AttemptStats::default();
        let fail = |e: ApiError, s: AttemptStats| Err((e, s));

        let offset = tokio::fs::metadata(&request.destination)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        if let Some(parent) = request.destination.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return fail(
                        ApiError::Unknown(format!(
                            "failed to create {}: {e}",
                            parent.display()
                        )),
                        stats,
                    );
                }
            }
        }

        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if offset > 0 {
            builder = builder.header(reqwest::header::RANGE, format!("bytes={offset}-"));
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return fail(ApiError::Cancelled, stats),
            result = builder.send() => match result {
                Ok(r) => r,
                Err(e) => return fail(classify::classify_reqwest_error(&e), stats),
            },
        };

        let status = response.status();
        let (start_offset, truncate) = match status {
            StatusCode::PARTIAL_CONTENT => {
                stats.resumed = offset > 0;
                (offset, false)
            }
            StatusCode::OK => {
                if offset > 0 {
                    // Server ignored the range: restart the whole file.
                    debug!(url = request.url, "server does not support ranges, restarting");
                }
                (0, true)
            }
            _ => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(classify::parse_retry_after);
                let body = response.text().await.unwrap_or_default();
                return fail(classify::error_for_status(status, retry_after, &body), stats);
            }
        };

        let total_bytes = request.expected_size.or_else(|| {
            response
                .content_length()
                .map(|remaining| start_offset + remaining)
        });

        let mut open_options = tokio::fs::OpenOptions::new();
        open_options.create(true).write(true);
        if truncate {
            open_options.truncate(true);
        } else {
            open_options.append(true);
        }
        let file = match open_options.open(&request.destination).await {
            Ok(f) => f,
            Err(e) => {
                return fail(
                    ApiError::Unknown(format!(
                        "failed to open {}: {e}",
                        request.destination.display()
                    )),
                    stats,
                )
            }
        };
        let mut writer = BufWriter::with_capacity(self.config.write_buffer, file);

        let mut stream = response.bytes_stream();
        let attempt_started = Instant::now();
        let mut last_emit: Option<Instant> = None;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    // Keep every whole chunk written so far: flush and sync
                    // before reporting cancellation so the partial file is
                    // resumable.
                    let _ = writer.flush().await;
                    let _ = writer.get_ref().sync_all().await;
                    return fail(ApiError::Cancelled, stats);
                }
                chunk = stream.next() => chunk,
            };

            let chunk = match next {
                None => break,
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    let _ = writer.flush().await;
                    let _ = writer.get_ref().sync_all().await;
                    return fail(
                        ApiError::Network(format!("download stream error: {e}")),
                        stats,
                    );
                }
            };

            if let Err(e) = writer.write_all(&chunk).await {
                return fail(
                    ApiError::Unknown(format!(
                        "failed to write {}: {e}",
                        request.destination.display()
                    )),
                    stats,
                );
            }
            stats.bytes_written += chunk.len() as u64;

            let due = last_emit
                .map(|at| at.elapsed() >= self.config.progress_interval)
                .unwrap_or(true);
            if due {
                last_emit = Some(Instant::now());
                emit(
                    on_progress,
                    start_offset + stats.bytes_written,
                    total_bytes,
                    attempt_started.elapsed(),
                    TransferState::Downloading,
                );
            }
        }

        if let Err(e) = writer.flush().await {
            return fail(
                ApiError::Unknown(format!("failed to flush destination: {e}")),
                stats,
            );
        }
        if let Err(e) = writer.get_ref().sync_all().await {
            return fail(
                ApiError::Unknown(format!("failed to sync destination: {e}")),
                stats,
            );
        }

        let on_disk = start_offset + stats.bytes_written;
        if let Some(expected) = request.expected_size {
            if expected > 0 && on_disk < expected {
                // A clean EOF short of the expected size: the partial file
                // stays for the next attempt's Range request.
                return fail(
                    ApiError::Network(format!(
                        "stream ended early: {on_disk} of {expected} bytes"
                    )),
                    stats,
                );
            }
            if on_disk > expected && expected > 0 {
                warn!(
                    url = request.url,
                    expected, on_disk, "downloaded more bytes than the listing reported"
                );
            }
        }

        Ok(stats)
    }
}

/// Average speed in bytes per second.
fn speed(bytes: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}

/// Delivers a progress snapshot, computing speed and ETA.
fn emit(
    on_progress: Option<&ProgressCallback>,
    bytes_transferred: u64,
    total_bytes: Option<u64>,
    elapsed: Duration,
    state: TransferState,
) {
    let Some(callback) = on_progress else {
        return;
    };
    let speed_bps = speed(bytes_transferred, elapsed);
    let eta = match (total_bytes, speed_bps > 0.0) {
        (Some(total), true) if total > bytes_transferred => Some(Duration::from_secs_f64(
            (total - bytes_transferred) as f64 / speed_bps,
        )),
        _ => None,
    };
    callback(&TransferProgress {
        bytes_transferred,
        total_bytes,
        speed_bps,
        eta,
        state,
    });
}
