//! Box API adapters.
//!
//! The downstream side of the migration pipeline:
//!
//! - [`auth::BoxTokenManager`] - enterprise client-credentials bearer
//!   tokens, cached with the same expiry buffer as the upstream side
//! - [`client::BoxClient`] - users, folders, and uploads; implements the
//!   [`recpipe_core::ports::ObjectStore`] port, with all per-user content
//!   operations performed in that user's context

pub mod auth;
pub mod client;

pub use auth::BoxTokenManager;
pub use client::BoxClient;
