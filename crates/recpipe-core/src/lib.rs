//! Core domain logic for recpipe.
//!
//! This crate holds everything the migration pipeline knows that is
//! independent of any concrete API or filesystem:
//!
//! - [`domain`] - entities (recordings, download lifecycle rows, user list
//!   rows), the error taxonomy, and deterministic path planning
//! - [`ports`] - capability traits the orchestrators depend on
//!   ([`ports::RecordingSource`], [`ports::ObjectStore`]), expressed so they
//!   can be faked in tests without a real HTTP server
//! - [`config`] - typed configuration with YAML loading, environment
//!   overrides for credentials, and validation
//!
//! No I/O happens here beyond reading configuration files.

pub mod config;
pub mod domain;
pub mod ports;
