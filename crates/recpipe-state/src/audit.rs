//! Per-user audit trail.
//!
//! An append-only CSV, one per user, recording every file placed
//! downstream. The header is written when the file is first created;
//! after that, rows are only ever appended.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;

use crate::StateError;

/// CSV header of the per-user audit file.
pub const AUDIT_HEADER: &str = "zoom_user,file_name,file_size_bytes,upload_date_iso8601,processing_time_ms";

/// One audit row: what was placed, how big it was, and how long the
/// download-to-upload journey took.
///
/// `processing_time_ms` is zero for metadata sidecars and for nothing
/// else; an already-present primary file still records the time this run
/// actually spent on it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub zoom_user: String,
    pub file_name: String,
    pub file_size_bytes: u64,
    pub upload_date: DateTime<Utc>,
    pub processing_time_ms: u64,
}

impl AuditRow {
    fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            csv_escape(&self.zoom_user),
            csv_escape(&self.file_name),
            self.file_size_bytes,
            self.upload_date.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.processing_time_ms
        )
    }
}

/// Quotes a CSV field when it contains a comma, quote, or newline.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Appends audit rows to one user's `uploads.csv`.
pub struct AuditWriter {
    path: PathBuf,
}

impl AuditWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The CSV path, for uploading the file itself at the end of a user.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row, creating the file (and its parent directory) with
    /// the header on first use.
    pub async fn append(&self, row: &AuditRow) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StateError::io(parent, e))?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StateError::io(&self.path, e))?;

        let is_new = file
            .metadata()
            .await
            .map(|m| m.len() == 0)
            .map_err(|e| StateError::io(&self.path, e))?;

        let mut line = String::new();
        if is_new {
            line.push_str(AUDIT_HEADER);
            line.push('\n');
        }
        line.push_str(&row.to_csv_line());
        line.push('\n');

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StateError::io(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| StateError::io(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, size: u64, ms: u64) -> AuditRow {
        AuditRow {
            zoom_user: "john.doe@example.com".into(),
            file_name: name.into(),
            file_size_bytes: size,
            upload_date: "2024-01-15T12:00:00Z".parse().unwrap(),
            processing_time_ms: ms,
        }
    }

    #[tokio::test]
    async fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AuditWriter::new(dir.path().join("john.doe").join("uploads.csv"));

        writer.append(&row("a-1030.mp4", 1024, 2500)).await.unwrap();
        writer.append(&row("a-1030.mp4.json", 512, 0)).await.unwrap();

        let content = tokio::fs::read_to_string(writer.path()).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], AUDIT_HEADER);
        assert_eq!(
            lines[1],
            "john.doe@example.com,a-1030.mp4,1024,2024-01-15T12:00:00Z,2500"
        );
        assert_eq!(
            lines[2],
            "john.doe@example.com,a-1030.mp4.json,512,2024-01-15T12:00:00Z,0"
        );
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AuditWriter::new(dir.path().join("deep/tree/uploads.csv"));
        writer.append(&row("f.mp4", 1, 1)).await.unwrap();
        assert!(writer.path().exists());
    }

    #[tokio::test]
    async fn test_appends_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploads.csv");
        AuditWriter::new(&path)
            .append(&row("one.mp4", 1, 1))
            .await
            .unwrap();
        AuditWriter::new(&path)
            .append(&row("two.mp4", 2, 2))
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 3); // header + 2 rows
        assert_eq!(content.matches(AUDIT_HEADER).count(), 1);
    }

    #[tokio::test]
    async fn test_csv_escaping() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AuditWriter::new(dir.path().join("uploads.csv"));
        writer
            .append(&row("weird, \"name\".mp4", 7, 0))
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(writer.path()).await.unwrap();
        assert!(content.contains("\"weird, \"\"name\"\".mp4\""));
    }
}
