//! Durable pipeline state.
//!
//! Three pieces of global persistent state, each protected by a single
//! writer and written with temp-file + rename so a crash never leaves a
//! half-written file:
//!
//! - [`status::StatusStore`] - the per-file lifecycle map (one JSON
//!   document), inspectable and queryable after a crash
//! - [`users::ActiveUsersFile`] - the user list with a completion column,
//!   rewritten line-by-line so comments and blanks survive verbatim
//! - [`audit::AuditWriter`] - the per-user append-only upload CSV

pub mod audit;
pub mod status;
pub mod users;

use std::path::PathBuf;

use thiserror::Error;

pub use audit::{AuditRow, AuditWriter, AUDIT_HEADER};
pub use status::{StatusFile, StatusStore};
pub use users::ActiveUsersFile;

/// Errors from the durable state layer.
///
/// These are fatal for the current user: the pipeline never proceeds past
/// a state write it could not make durable.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no such status entry: {0}")]
    UnknownEntry(String),

    #[error("user not found in active users file: {0}")]
    UnknownUser(String),
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.into(),
            source,
        }
    }
}
