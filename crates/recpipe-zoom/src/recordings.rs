//! Recording listing and per-meeting detail.
//!
//! The upstream list endpoint caps the `(from, to)` window at one month, so
//! an arbitrary range is walked as a sequence of one-month chunks, each of
//! which is paged to exhaustion before the walk advances. Chunk boundaries
//! advance by one month plus one day so no boundary date is listed twice.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Months, NaiveDate};
use recpipe_core::domain::{ApiError, Recording};
use recpipe_core::ports::{
    DownloadOutcome, DownloadRequest, ProgressCallback, RecordingSource,
};
use recpipe_http::RetryTransport;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::TokenManager;
use crate::download::RangedDownloader;

/// Page size for the recordings listing endpoint (the API maximum).
const LIST_PAGE_SIZE: u32 = 300;

/// One page of the recordings listing response.
#[derive(Debug, Deserialize)]
struct RecordingsPage {
    #[serde(default)]
    next_page_token: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    total_records: Option<u32>,
    #[serde(default)]
    meetings: Vec<Recording>,
}

// ============================================================================
// Date-range sharding
// ============================================================================

/// Splits `[from, to]` into chunks of at most one calendar month.
///
/// Consecutive chunks are separated by one day (`next.from == prev.to + 1`)
/// so meetings on a boundary date appear in exactly one chunk. The windows
/// cover the full range: the first starts at `from`, the last ends at `to`.
pub fn month_windows(from: NaiveDate, to: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let mut windows = Vec::new();
    let mut cur = from;
    while cur <= to {
        let month_end = cur.checked_add_months(Months::new(1)).unwrap_or(to);
        let chunk_to = month_end.min(to);
        windows.push((cur, chunk_to));
        match chunk_to.succ_opt() {
            Some(next) => cur = next,
            None => break,
        }
    }
    windows
}

/// Query-escapes a meeting UUID.
///
/// Meeting UUIDs can contain `/` and `=`, which must be encoded the way a
/// query component is (path-style escaping leaves `/` intact and breaks the
/// route).
fn encode_meeting_uuid(uuid: &str) -> String {
    url::form_urlencoded::byte_serialize(uuid.as_bytes()).collect()
}

// ============================================================================
// ZoomClient
// ============================================================================

/// Typed client for the recordings API, carrying its own token manager,
/// retry transport, and ranged downloader.
pub struct ZoomClient {
    transport: RetryTransport,
    base_url: String,
    tokens: Arc<TokenManager>,
    downloader: RangedDownloader,
}

impl ZoomClient {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<TokenManager>,
        transport: RetryTransport,
        downloader: RangedDownloader,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            tokens,
            downloader,
        }
    }

    /// Fetches one page of the listing.
    async fn list_page(
        &self,
        cancel: &CancellationToken,
        user_email: &str,
        from: NaiveDate,
        to: NaiveDate,
        next_page_token: Option<&str>,
    ) -> Result<RecordingsPage, ApiError> {
        let token = self.tokens.get_token(cancel).await.map_err(ApiError::from)?;
        let url = format!("{}/users/{}/recordings", self.base_url, user_email);

        let response = self
            .transport
            .execute(cancel, |client| {
                let mut request = client
                    .get(&url)
                    .bearer_auth(&token.access_token)
                    .query(&[
                        ("from", from.to_string()),
                        ("to", to.to_string()),
                        ("page_size", LIST_PAGE_SIZE.to_string()),
                    ]);
                if let Some(page_token) = next_page_token {
                    request = request.query(&[("next_page_token", page_token)]);
                }
                request
            })
            .await?;

        response
            .json::<RecordingsPage>()
            .await
            .map_err(|e| ApiError::Unknown(format!("failed to parse recordings page: {e}")))
    }

    /// Pages one chunk to exhaustion.
    async fn list_chunk(
        &self,
        cancel: &CancellationToken,
        user_email: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Recording>, ApiError> {
        let mut meetings = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .list_page(cancel, user_email, from, to, page_token.as_deref())
                .await?;
            meetings.extend(page.meetings);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(user = user_email, %from, %to, meetings = meetings.len(), "listed chunk");
        Ok(meetings)
    }
}

#[async_trait]
impl RecordingSource for ZoomClient {
    /// Lists every recorded meeting in `[from, to]`, sharded around the
    /// one-month window limit. A chunk failure aborts the whole listing;
    /// partial results are never returned.
    async fn list_all_recordings(
        &self,
        cancel: &CancellationToken,
        user_email: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Recording>, ApiError> {
        let windows = month_windows(from, to);
        let mut all = Vec::new();
        for (chunk_from, chunk_to) in &windows {
            let meetings = self
                .list_chunk(cancel, user_email, *chunk_from, *chunk_to)
                .await?;
            all.extend(meetings);
        }
        info!(
            user = user_email,
            %from,
            %to,
            chunks = windows.len(),
            meetings = all.len(),
            "listed recordings"
        );
        Ok(all)
    }

    /// Fetches one meeting's detail with `include_fields=download_access_token`
    /// so downloads can authorize with the short-lived token in a header
    /// (URL-token downloads truncate large files).
    async fn get_meeting_recordings(
        &self,
        cancel: &CancellationToken,
        meeting_uuid: &str,
    ) -> Result<Recording, ApiError> {
        let token = self.tokens.get_token(cancel).await.map_err(ApiError::from)?;
        let url = format!(
            "{}/meetings/{}/recordings",
            self.base_url,
            encode_meeting_uuid(meeting_uuid)
        );

        let response = self
            .transport
            .execute(cancel, |client| {
                client
                    .get(&url)
                    .bearer_auth(&token.access_token)
                    .query(&[("include_fields", "download_access_token")])
            })
            .await?;

        response
            .json::<Recording>()
            .await
            .map_err(|e| ApiError::Unknown(format!("failed to parse meeting detail: {e}")))
    }

    /// Streams a recording file to disk, preferring the request's
    /// short-lived download token and falling back to an OAuth token.
    async fn download_stream(
        &self,
        cancel: &CancellationToken,
        mut request: DownloadRequest,
        on_progress: Option<ProgressCallback>,
    ) -> DownloadOutcome {
        let bearer = match &request.bearer_token {
            Some(download_token) => download_token.clone(),
            None => match self.tokens.get_token(cancel).await {
                Ok(token) => token.access_token,
                Err(e) => return self.downloader.failed_outcome(ApiError::from(e)),
            },
        };
        request
            .headers
            .push(("Authorization".to_string(), format!("Bearer {bearer}")));

        self.downloader.download(cancel, &request, on_progress).await
    }
}
