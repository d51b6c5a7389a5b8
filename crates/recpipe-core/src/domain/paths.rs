//! Deterministic local and remote path formation.
//!
//! Both sides of the pipeline must agree on where a recording file lives:
//!
//! - locally: `<base>/<username>/<YYYY>/<MM>/<DD>/<topic>-<HHMM><ext>`
//! - remotely: `<user-root>/<YYYY>/<MM>/<DD>/<same filename>`
//!
//! The date-folder triple is computed from the recording's start time in
//! UTC on both sides; the HHMM component keeps the meeting's own wall-clock
//! time so a 10:30 meeting in New York is named `-1030` even though its UTC
//! date folder may differ. Running the planner twice over the same inputs
//! always yields the same paths.

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Utc};

use super::errors::DomainError;
use super::recording::{Recording, RecordingFileType};

/// Fallback topic when sanitization removes every character.
const FALLBACK_TOPIC: &str = "recording";

/// Lowercases a meeting topic and collapses every run of non-alphanumeric
/// characters into a single hyphen.
///
/// "Test Meeting" becomes "test-meeting"; "Q1 / Planning!!" becomes
/// "q1-planning". A topic with no usable characters becomes "recording".
pub fn sanitize_topic(topic: &str) -> String {
    let mut out = String::with_capacity(topic.len());
    let mut last_was_dash = true; // suppress a leading dash
    for c in topic.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        FALLBACK_TOPIC.to_string()
    } else {
        out
    }
}

/// Local part of an email address, used as the per-user directory name.
pub fn username_from_email(email: &str) -> Result<&str, DomainError> {
    match email.split('@').next() {
        Some(local) if !local.is_empty() => Ok(local),
        _ => Err(DomainError::InvalidEmail(email.to_string())),
    }
}

/// `(YYYY, MM, DD)` of the recording start, computed in UTC.
///
/// Used identically for the local tree and the remote folder tree so the
/// two always agree.
pub fn date_components_utc(start: &DateTime<FixedOffset>) -> (String, String, String) {
    let utc = start.with_timezone(&Utc);
    (
        utc.format("%Y").to_string(),
        utc.format("%m").to_string(),
        utc.format("%d").to_string(),
    )
}

/// Filename for one recording file: `<sanitized-topic>-<HHMM><ext>`.
///
/// HHMM is formatted in the start time's own offset, preserving the
/// meeting's local wall-clock time in the name.
pub fn file_basename(topic: &str, start: &DateTime<FixedOffset>, file_type: RecordingFileType) -> String {
    format!(
        "{}-{}{}",
        sanitize_topic(topic),
        start.format("%H%M"),
        file_type.extension()
    )
}

/// Full local path plan for one recording file.
pub fn local_path(
    base: &Path,
    box_email: &str,
    recording: &Recording,
    file_type: RecordingFileType,
) -> Result<PathBuf, DomainError> {
    let username = username_from_email(box_email)?;
    let (year, month, day) = date_components_utc(&recording.start_time);
    Ok(base
        .join(username)
        .join(year)
        .join(month)
        .join(day)
        .join(file_basename(&recording.topic, &recording.start_time, file_type)))
}

/// The `<YYYY>/<MM>/<DD>` folder segments for the remote tree.
pub fn remote_segments(recording: &Recording) -> [String; 3] {
    let (year, month, day) = date_components_utc(&recording.start_time);
    [year, month, day]
}

/// Path of the JSON metadata sidecar written next to a media file:
/// the same basename with `.json` appended.
pub fn sidecar_path(media_path: &Path) -> PathBuf {
    let mut name = media_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".json");
    media_path.with_file_name(name)
}
