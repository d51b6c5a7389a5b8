//! Rows of the Active Users File.
//!
//! Each content line of the users file maps one upstream account to a
//! downstream account plus a completion flag:
//!
//! ```text
//! zoom_email
//! zoom_email,box_email
//! zoom_email,box_email,upload_complete
//! ```
//!
//! Parsing is deliberately forgiving: a bare email maps to itself, a
//! missing flag defaults to false, and unrecognized flag spellings read as
//! false. Serialization always emits the full three-field form.

use serde::{Deserialize, Serialize};

/// One user row: upstream email, downstream email, completion flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    /// Email on the upstream conferencing service
    pub zoom_email: String,
    /// Email on the downstream object store
    pub box_email: String,
    /// True once every file of this user is durably placed downstream
    pub upload_complete: bool,
    /// Zero-based line number in the source file, for in-place rewrite
    #[serde(default)]
    pub line_number: usize,
}

impl UserEntry {
    /// Parses one content line.
    ///
    /// Returns `None` for lines that are not a user row (the caller treats
    /// those as passthrough text). Comments and blanks are expected to be
    /// filtered out before this is called; this only rejects structurally
    /// invalid rows (an empty first field or too many fields).
    pub fn parse(line: &str, line_number: usize) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }

        let fields: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        if fields.len() > 3 || fields[0].is_empty() || !fields[0].contains('@') {
            return None;
        }

        let zoom_email = fields[0].to_string();
        let box_email = match fields.get(1) {
            Some(f) if !f.is_empty() => f.to_string(),
            _ => zoom_email.clone(),
        };
        let upload_complete = fields
            .get(2)
            .map(|f| parse_flag(f))
            .unwrap_or(false);

        Some(Self {
            zoom_email,
            box_email,
            upload_complete,
            line_number,
        })
    }

    /// Canonical three-field serialization of this row.
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{}",
            self.zoom_email, self.box_email, self.upload_complete
        )
    }

    /// Local part of the downstream email, used as the per-user directory
    /// name. `None` when the email has no local part.
    pub fn username(&self) -> Option<&str> {
        let local = self.box_email.split('@').next()?;
        if local.is_empty() {
            None
        } else {
            Some(local)
        }
    }
}

/// Accepts true/yes/1 (case-insensitive) as true; everything else is false.
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "1"
    )
}
