//! Zoom Cloud Recordings API adapters.
//!
//! Implements the upstream side of the migration pipeline:
//!
//! - [`auth::TokenManager`] - account-credentials bearer tokens, cached and
//!   refreshed ahead of expiry
//! - [`recordings::ZoomClient`] - recording listing with one-month window
//!   sharding and pagination, plus per-meeting detail; implements the
//!   [`recpipe_core::ports::RecordingSource`] port
//! - [`download::RangedDownloader`] - streams a recording file to local
//!   disk with resume-from-offset and progress callbacks

pub mod auth;
pub mod download;
pub mod recordings;

pub use auth::{Token, TokenManager};
pub use download::{DownloaderConfig, RangedDownloader};
pub use recordings::ZoomClient;
