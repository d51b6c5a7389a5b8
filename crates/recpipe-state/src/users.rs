//! The Active Users File.
//!
//! A line-oriented text file listing the users to migrate, with a
//! completion column the pipeline updates in place. Comments (`#`), blank
//! lines, and even invalid data lines are preserved verbatim across
//! rewrites: the writer walks the original lines and substitutes only the
//! rows whose tuple actually changed. Rewrites are atomic (temp + rename).

use std::path::{Path, PathBuf};

use recpipe_core::domain::UserEntry;
use tracing::debug;

use crate::StateError;

/// One physical line: the raw text plus its parse, when it is a user row.
#[derive(Debug, Clone)]
struct Line {
    raw: String,
    entry: Option<UserEntry>,
}

/// In-memory image of the users file.
pub struct ActiveUsersFile {
    path: PathBuf,
    lines: Vec<Line>,
    /// Whether the original file ended with a newline; preserved so a
    /// rewrite with no row changes is byte-identical.
    trailing_newline: bool,
}

impl ActiveUsersFile {
    /// Loads and parses the users file.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| StateError::io(&path, e))?;

        let trailing_newline = content.ends_with('\n');
        let mut raw_lines: Vec<&str> = content.split('\n').collect();
        if trailing_newline {
            raw_lines.pop();
        }

        let lines = raw_lines
            .into_iter()
            .enumerate()
            .map(|(i, raw)| Line {
                raw: raw.to_string(),
                entry: UserEntry::parse(raw, i),
            })
            .collect::<Vec<_>>();

        let users = lines.iter().filter(|l| l.entry.is_some()).count();
        debug!(path = %path.display(), lines = lines.len(), users, "loaded active users file");

        Ok(Self {
            path,
            lines,
            trailing_newline,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every parsed user row, in file order.
    pub fn entries(&self) -> Vec<UserEntry> {
        self.lines.iter().filter_map(|l| l.entry.clone()).collect()
    }

    /// User rows not yet marked complete.
    pub fn pending(&self) -> Vec<UserEntry> {
        self.lines
            .iter()
            .filter_map(|l| l.entry.clone())
            .filter(|e| !e.upload_complete)
            .collect()
    }

    /// Looks up a user row by upstream email.
    pub fn find(&self, zoom_email: &str) -> Option<UserEntry> {
        self.lines
            .iter()
            .filter_map(|l| l.entry.as_ref())
            .find(|e| e.zoom_email.eq_ignore_ascii_case(zoom_email))
            .cloned()
    }

    /// Sets a user's completion flag and atomically rewrites the file.
    ///
    /// Only the target row's line changes (to the canonical three-field
    /// form); every other line, including comments and invalid rows, is
    /// copied through verbatim. The rewrite is durable before this returns.
    pub async fn mark_complete(
        &mut self,
        zoom_email: &str,
        complete: bool,
    ) -> Result<(), StateError> {
        let line = self
            .lines
            .iter_mut()
            .find(|l| {
                l.entry
                    .as_ref()
                    .map(|e| e.zoom_email.eq_ignore_ascii_case(zoom_email))
                    .unwrap_or(false)
            })
            .ok_or_else(|| StateError::UnknownUser(zoom_email.to_string()))?;

        let entry = line.entry.as_mut().expect("matched line has an entry");
        entry.upload_complete = complete;
        line.raw = entry.to_line();

        self.save().await
    }

    /// Atomically writes the current line image back to disk.
    pub async fn save(&self) -> Result<(), StateError> {
        let mut content = self
            .lines
            .iter()
            .map(|l| l.raw.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if self.trailing_newline {
            content.push('\n');
        }

        let tmp = self.path.with_extension("txt.tmp");
        tokio::fs::write(&tmp, content.as_bytes())
            .await
            .map_err(|e| StateError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StateError::io(&self.path, e))?;
        Ok(())
    }
}
