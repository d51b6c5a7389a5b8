//! Capability ports the orchestrators depend on.
//!
//! The per-user orchestrator talks to the upstream service only through
//! [`RecordingSource`] and to the downstream store only through
//! [`ObjectStore`]; tests fake both with in-memory implementations instead
//! of standing up HTTP servers.

pub mod object_store;
pub mod recording_source;

pub use object_store::{ObjectStore, RemoteEntry, StoreRoot};
pub use recording_source::{
    DownloadOutcome, DownloadRequest, ProgressCallback, RecordingSource, TransferProgress,
    TransferState,
};
