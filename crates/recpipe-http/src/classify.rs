//! Failure classification.
//!
//! Maps HTTP status codes and reqwest transport errors into the shared
//! [`ErrorCategory`] taxonomy, and parses `Retry-After` headers in both of
//! their legal forms (delta-seconds and HTTP-date).

use std::time::Duration;

use recpipe_core::domain::{ApiError, ErrorCategory};
use reqwest::StatusCode;
use tracing::warn;

/// Longest `Retry-After` the transport will honor from an HTTP-date.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Classifies an HTTP response status.
///
/// - 429 → RateLimit
/// - 401 | 403 → Auth
/// - other 4xx → Client
/// - 5xx → Server
/// - anything else → Unknown (success codes never reach this)
pub fn classify_status(status: StatusCode) -> ErrorCategory {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ErrorCategory::RateLimit,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorCategory::Auth,
        s if s.is_client_error() => ErrorCategory::Client,
        s if s.is_server_error() => ErrorCategory::Server,
        _ => ErrorCategory::Unknown,
    }
}

/// Builds an [`ApiError`] for a non-success response.
///
/// `retry_after` is the already-parsed header value, if any; `body` is a
/// short snippet of the response body for the error message.
pub fn error_for_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> ApiError {
    let message = if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string()
    } else {
        let mut snippet: String = body.chars().take(200).collect();
        if snippet.len() < body.len() {
            snippet.push('…');
        }
        snippet
    };

    match classify_status(status) {
        ErrorCategory::RateLimit => ApiError::RateLimit {
            message,
            retry_after,
        },
        ErrorCategory::Auth => ApiError::Auth(format!("HTTP {}: {}", status.as_u16(), message)),
        ErrorCategory::Client => ApiError::Client {
            status: status.as_u16(),
            message,
        },
        ErrorCategory::Server => ApiError::Server {
            status: status.as_u16(),
            message,
        },
        _ => ApiError::Unknown(format!("HTTP {}: {}", status.as_u16(), message)),
    }
}

/// Classifies a reqwest transport error (no response was produced).
///
/// Timeouts map to Timeout; connection-level failures (refused, reset,
/// DNS) map to Network; everything else is Unknown.
pub fn classify_reqwest_error(err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        ApiError::Network(err.to_string())
    } else {
        ApiError::Unknown(err.to_string())
    }
}

/// Parses a `Retry-After` header value.
///
/// Accepts an integer number of seconds ("3") or an HTTP-date
/// ("Fri, 31 Dec 2027 23:59:59 GMT", interpreted as seconds from now).
/// Returns `None` when the value cannot be parsed.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(trimmed) {
        let now = chrono::Utc::now();
        let target = date.with_timezone(&chrono::Utc);
        if target > now {
            if let Ok(wait) = (target - now).to_std() {
                return Some(wait.min(MAX_RETRY_AFTER));
            }
        }
        // A date in the past means "retry immediately".
        return Some(Duration::ZERO);
    }

    warn!(value, "could not parse Retry-After header");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status_table() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorCategory::RateLimit
        );
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ErrorCategory::Auth);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), ErrorCategory::Auth);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), ErrorCategory::Client);
        assert_eq!(classify_status(StatusCode::CONFLICT), ErrorCategory::Client);
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            ErrorCategory::Server
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            ErrorCategory::Server
        );
    }

    #[test]
    fn test_error_for_status_rate_limit_carries_retry_after() {
        let err = error_for_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(3)),
            "slow down",
        );
        match err {
            ApiError::RateLimit {
                retry_after: Some(d),
                ..
            } => assert_eq!(d, Duration::from_secs(3)),
            other => panic!("expected RateLimit, got {other:?}"),
        }
    }

    #[test]
    fn test_error_for_status_truncates_body() {
        let body = "x".repeat(500);
        let err = error_for_status(StatusCode::BAD_REQUEST, None, &body);
        match err {
            ApiError::Client { status, message } => {
                assert_eq!(status, 400);
                assert!(message.len() < 250);
            }
            other => panic!("expected Client, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("  45 "), Some(Duration::from_secs(45)));
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let future = chrono::Utc::now() + chrono::Duration::seconds(30);
        let value = future.to_rfc2822();
        let parsed = parse_retry_after(&value).unwrap();
        assert!(parsed <= Duration::from_secs(31));
        assert!(parsed >= Duration::from_secs(25));
    }

    #[test]
    fn test_parse_retry_after_past_date_is_zero() {
        let past = chrono::Utc::now() - chrono::Duration::seconds(300);
        assert_eq!(parse_retry_after(&past.to_rfc2822()), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        assert_eq!(parse_retry_after("soonish"), None);
        assert_eq!(parse_retry_after(""), None);
    }
}
