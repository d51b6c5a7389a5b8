//! Error taxonomy shared across the pipeline.
//!
//! Every HTTP adapter classifies its failures into [`ApiError`] so the
//! orchestrators can make transient-vs-permanent decisions in one place.
//! The categories are stable: Auth, Network, Timeout, RateLimit, Server,
//! Client, Unknown. Token acquisition has its own [`AuthError`] because its
//! failure modes (parse failures, rejected grants, missing scopes) carry
//! more structure than a plain category.

use std::time::Duration;

use thiserror::Error;

// ============================================================================
// ErrorCategory
// ============================================================================

/// Coarse classification of an API failure.
///
/// The retry transport consults the category to decide whether a failure is
/// worth another attempt; the per-user orchestrator consults it to decide
/// whether a whole user should be marked failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Credentials or scope problems (401/403). Never retried.
    Auth,
    /// Connectivity: refused/reset connections, DNS failures.
    Network,
    /// Deadlines, cancellation.
    Timeout,
    /// The upstream signalled back-pressure (429).
    RateLimit,
    /// 5xx-class responses.
    Server,
    /// 4xx-class responses other than auth.
    Client,
    /// Anything that could not be classified.
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Auth => "auth",
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Server => "server",
            ErrorCategory::Client => "client",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ============================================================================
// ApiError
// ============================================================================

/// A classified API failure.
///
/// Constructed by the retry transport (and by adapters for failures that
/// never reach it). [`ApiError::Exhausted`] wraps the last classified error
/// once the retry budget is spent, preserving the attempt count.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// Credential or scope failure (HTTP 401/403).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Connection-level failure: refused, reset, unreachable, DNS.
    #[error("network error: {0}")]
    Network(String),

    /// Deadline exceeded.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// HTTP 429. `retry_after` carries the parsed `Retry-After` header.
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// HTTP 5xx.
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// HTTP 4xx other than 401/403.
    #[error("client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    /// The caller's cancellation signal fired.
    #[error("request cancelled")]
    Cancelled,

    /// The circuit breaker rejected the call without sending it.
    #[error("circuit breaker open, request rejected")]
    CircuitOpen,

    /// Retry budget exhausted; wraps the last classified error.
    #[error("{source} (gave up after {attempts} attempts)")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<ApiError>,
    },

    /// Unclassifiable transport error.
    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl ApiError {
    /// Returns the category this error belongs to.
    ///
    /// `Exhausted` reports the category of the wrapped error so callers can
    /// still distinguish "gave up on a flaky server" from "gave up on DNS".
    pub fn category(&self) -> ErrorCategory {
        match self {
            ApiError::Auth(_) => ErrorCategory::Auth,
            ApiError::Network(_) => ErrorCategory::Network,
            ApiError::Timeout(_) | ApiError::Cancelled => ErrorCategory::Timeout,
            ApiError::RateLimit { .. } => ErrorCategory::RateLimit,
            ApiError::Server { .. } => ErrorCategory::Server,
            ApiError::Client { .. } => ErrorCategory::Client,
            ApiError::Exhausted { source, .. } => source.category(),
            ApiError::CircuitOpen | ApiError::Unknown(_) => ErrorCategory::Unknown,
        }
    }

    /// True if the cancellation signal caused this error.
    pub fn is_cancelled(&self) -> bool {
        match self {
            ApiError::Cancelled => true,
            ApiError::Exhausted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Number of attempts recorded on the error (1 for unwrapped errors).
    pub fn attempts(&self) -> u32 {
        match self {
            ApiError::Exhausted { attempts, .. } => *attempts,
            _ => 1,
        }
    }
}

// ============================================================================
// AuthError
// ============================================================================

/// Failures while obtaining or validating an access token.
///
/// Token fetches are not retried by the token manager itself; these errors
/// surface to callers, who may route them through the shared taxonomy via
/// the `From<AuthError> for ApiError` impl.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthError {
    /// The token request could not be sent or the connection failed.
    #[error("token request failed: {0}")]
    RequestFailed(String),

    /// The token endpoint answered but the body was not understood.
    #[error("failed to parse token response: {0}")]
    ResponseParsing(String),

    /// The token endpoint rejected the grant with a recognizable body.
    #[error("token request rejected: {error}: {reason}")]
    Rejected { error: String, reason: String },

    /// The granted token is missing required scopes.
    #[error("insufficient scope, missing: {}", missing.join(", "))]
    InsufficientScope { missing: Vec<String> },

    /// The caller's cancellation signal fired during the token fetch.
    #[error("token request cancelled")]
    Cancelled,
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::RequestFailed(msg) => ApiError::Network(msg),
            AuthError::ResponseParsing(msg) => ApiError::Unknown(msg),
            AuthError::Rejected { error, reason } => {
                ApiError::Auth(format!("{error}: {reason}"))
            }
            AuthError::InsufficientScope { missing } => {
                ApiError::Auth(format!("insufficient scope, missing: {}", missing.join(", ")))
            }
            AuthError::Cancelled => ApiError::Cancelled,
        }
    }
}

// ============================================================================
// DomainError
// ============================================================================

/// Errors in pure domain operations (path planning, validation).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// An email address without a usable local part.
    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    /// A date range where `from` is after `to`.
    #[error("invalid date range: {from} is after {to}")]
    InvalidDateRange { from: String, to: String },
}
