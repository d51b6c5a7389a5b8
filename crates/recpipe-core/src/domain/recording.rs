//! Cloud recording entities as listed by the upstream conferencing service.
//!
//! A [`Recording`] is one meeting's server-side cloud recording; it owns an
//! ordered sequence of [`RecordingFile`]s (the video, the audio-only track,
//! the transcript, and so on). Both types are immutable after listing and
//! double as the wire shape of the upstream API, so they carry serde derives
//! matching the JSON field names.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

// ============================================================================
// RecordingFileType
// ============================================================================

/// File-type tag of a recording file.
///
/// The upstream API reports these as upper-case strings; anything it adds in
/// the future deserializes as [`RecordingFileType::Unknown`] rather than
/// failing the whole listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordingFileType {
    Mp4,
    M4a,
    Transcript,
    Chat,
    Cc,
    Csv,
    Json,
    #[serde(other)]
    Unknown,
}

impl RecordingFileType {
    /// Local filename extension for this file type.
    pub fn extension(&self) -> &'static str {
        match self {
            RecordingFileType::Mp4 => ".mp4",
            RecordingFileType::M4a => ".m4a",
            RecordingFileType::Transcript | RecordingFileType::Cc => ".vtt",
            RecordingFileType::Chat => ".txt",
            RecordingFileType::Csv => ".csv",
            RecordingFileType::Json => ".json",
            RecordingFileType::Unknown => ".bin",
        }
    }

    /// True for the primary media file of a recording.
    pub fn is_media(&self) -> bool {
        matches!(self, RecordingFileType::Mp4)
    }
}

impl std::fmt::Display for RecordingFileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordingFileType::Mp4 => "MP4",
            RecordingFileType::M4a => "M4A",
            RecordingFileType::Transcript => "TRANSCRIPT",
            RecordingFileType::Chat => "CHAT",
            RecordingFileType::Cc => "CC",
            RecordingFileType::Csv => "CSV",
            RecordingFileType::Json => "JSON",
            RecordingFileType::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

// ============================================================================
// RecordingFile
// ============================================================================

/// One constituent file of a cloud recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingFile {
    /// Upstream file identifier
    pub id: String,
    /// Identifier of the owning meeting
    #[serde(default)]
    pub meeting_id: String,
    /// When this segment started recording
    #[serde(default)]
    pub recording_start: Option<DateTime<FixedOffset>>,
    /// When this segment stopped recording
    #[serde(default)]
    pub recording_end: Option<DateTime<FixedOffset>>,
    /// File-type tag (MP4, M4A, TRANSCRIPT, ...)
    #[serde(default = "RecordingFile::default_file_type")]
    pub file_type: RecordingFileType,
    /// Extension as reported upstream (informational; local naming uses
    /// [`RecordingFileType::extension`])
    #[serde(default)]
    pub file_extension: Option<String>,
    /// Byte size; zero or absent when the upstream does not know it yet
    #[serde(default)]
    pub file_size: Option<u64>,
    /// One-shot download URL; empty means the file is not downloadable
    #[serde(default)]
    pub download_url: String,
    /// Playback URL (informational)
    #[serde(default)]
    pub play_url: Option<String>,
    /// Upstream processing status (e.g. "completed")
    #[serde(default)]
    pub status: Option<String>,
    /// Upstream recording type (e.g. "shared_screen_with_speaker_view")
    #[serde(default)]
    pub recording_type: Option<String>,
}

impl RecordingFile {
    fn default_file_type() -> RecordingFileType {
        RecordingFileType::Unknown
    }

    /// Stable identifier for this file across runs: `<recording-id>-<file-id>`.
    ///
    /// Used as the Status Store key so a re-listed meeting maps back onto the
    /// same durable lifecycle row.
    pub fn stable_id(&self, recording_uuid: &str) -> String {
        format!("{}-{}", recording_uuid, self.id)
    }

    /// Expected size, treating "unknown" as zero.
    pub fn size_or_zero(&self) -> u64 {
        self.file_size.unwrap_or(0)
    }
}

// ============================================================================
// Recording
// ============================================================================

/// A meeting's cloud recording as returned by the upstream listing API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    /// Meeting UUID (may contain `/` and `=`, which matters for URL encoding)
    pub uuid: String,
    /// Numeric meeting id
    #[serde(default)]
    pub id: i64,
    /// Account the meeting belongs to
    #[serde(default)]
    pub account_id: String,
    /// Host user identifier
    #[serde(default)]
    pub host_id: String,
    /// Meeting topic, used for filename formation
    #[serde(default)]
    pub topic: String,
    /// Upstream meeting type code
    #[serde(rename = "type", default)]
    pub meeting_type: Option<i32>,
    /// Meeting start, with its original UTC offset preserved.
    ///
    /// Date folders derive from this instant in UTC; the HHMM filename
    /// component keeps the meeting's own wall-clock time.
    pub start_time: DateTime<FixedOffset>,
    /// IANA timezone name as reported upstream (informational)
    #[serde(default)]
    pub timezone: Option<String>,
    /// Meeting duration in minutes
    #[serde(default)]
    pub duration: Option<i64>,
    /// Total byte size of all recording files
    #[serde(default)]
    pub total_size: Option<u64>,
    /// Number of recording files
    #[serde(default)]
    pub recording_count: Option<u32>,
    /// The recording files, in listing order
    #[serde(default)]
    pub recording_files: Vec<RecordingFile>,
    /// Short-lived token for downloading this recording's files.
    ///
    /// Only present when the per-meeting detail endpoint is asked for it;
    /// preferred over the OAuth token for download authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_access_token: Option<String>,
}
