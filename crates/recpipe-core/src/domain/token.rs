//! Bearer tokens.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::errors::AuthError;

/// Tokens are considered expired this long before their real expiry, so a
/// request never goes out with a token about to lapse mid-flight.
pub const TOKEN_EXPIRY_BUFFER_MINUTES: i64 = 5;

/// A bearer token with its expiry and granted scopes.
///
/// The cached copy lives in a token manager and is replaced wholesale on
/// refresh; a `Token` value itself never mutates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

impl Token {
    /// True while the token is safely usable: `now + buffer < expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::minutes(TOKEN_EXPIRY_BUFFER_MINUTES) < self.expires_at
    }

    /// Checks that every required scope was granted.
    pub fn validate_scopes(&self, required: &[&str]) -> Result<(), AuthError> {
        let missing: Vec<String> = required
            .iter()
            .filter(|r| !self.scopes.iter().any(|s| s == *r))
            .map(|r| r.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::InsufficientScope { missing })
        }
    }
}
