//! Migration orchestration engine.
//!
//! Ties the adapters together into the per-file and per-user state
//! machines:
//!
//! - [`uploader::UploadCoordinator`] - idempotent downstream placement
//!   (check-before-upload) with Status Store bookkeeping
//! - [`file_task::FileProcessor`] - drives one recording file from
//!   "listed" to "uploaded and locally cleaned up"
//! - [`user_task::UserProcessor`] - gates a user's work on preconditions,
//!   iterates files serially, and reports the outcome
//! - [`run::MigrationRun`] - walks the Active Users File and atomically
//!   flips completion flags
//!
//! Files are processed one at a time, users one at a time; every durable
//! state transition lands on disk before the action that depends on it.

pub mod file_task;
pub mod run;
pub mod uploader;
pub mod user_task;

use recpipe_core::domain::{ApiError, DomainError};
use recpipe_state::StateError;
use thiserror::Error;

pub use file_task::{FileProcessor, FileReport};
pub use run::{MigrationRun, RunOptions, RunSummary};
pub use uploader::{PlacedFile, UploadCoordinator};
pub use user_task::{UserOutcome, UserProcessor};

/// Errors the engine cannot absorb into per-file bookkeeping.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-user work counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub downloaded: u64,
    pub uploaded: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub errors: u64,
}

impl Counters {
    /// Folds another counter set into this one.
    pub fn merge(&mut self, other: &Counters) {
        self.downloaded += other.downloaded;
        self.uploaded += other.uploaded;
        self.skipped += other.skipped;
        self.deleted += other.deleted;
        self.errors += other.errors;
    }
}
