//! Retrying HTTP transport for the migration pipeline.
//!
//! This crate is the single place where transient-vs-permanent decisions
//! are made. Adapters hand it a request builder; it classifies failures
//! into the shared [`recpipe_core::domain::ApiError`] taxonomy, applies
//! typed backoff with jitter, honors `Retry-After`, and optionally routes
//! calls through a circuit breaker.
//!
//! ## Components
//!
//! - [`classify`] - response/transport-error classification and
//!   `Retry-After` parsing
//! - [`RetryPolicy`] - backoff curve, jitter, retryable category set
//! - [`CircuitBreaker`] - closed/open/half-open failure gate
//! - [`RetryTransport`] - the executor tying it all together

pub mod breaker;
pub mod classify;
pub mod retry;

pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use classify::{classify_reqwest_error, classify_status, parse_retry_after};
pub use retry::{RetryPolicy, RetryTransport};
