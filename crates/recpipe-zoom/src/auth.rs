//! Account-credentials token manager.
//!
//! The upstream API uses a two-legged, account-scoped grant: the pipeline
//! presents its long-lived `(account_id, client_id, client_secret)` and
//! receives a short-lived bearer token. Tokens are cached and replaced once
//! they come within five minutes of expiry.
//!
//! Token fetches are deliberately not retried here; transient-failure
//! handling belongs to the retry transport, and callers that want a retry
//! loop route the resulting [`AuthError`] through it.

use chrono::{Duration as ChronoDuration, Utc};
use recpipe_core::domain::AuthError;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use recpipe_core::domain::Token;

/// Fixed deadline for token endpoint requests.
const TOKEN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
}

/// Error body the token endpoint returns on rejected grants.
#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

// ============================================================================
// TokenManager
// ============================================================================

/// Produces a valid bearer token on demand, caching across calls.
///
/// Single writer, many readers: the cache is replaced atomically under a
/// lock when a refresh happens.
pub struct TokenManager {
    http: reqwest::Client,
    auth_url: String,
    account_id: String,
    client_id: String,
    client_secret: String,
    cache: Mutex<Option<Token>>,
}

impl TokenManager {
    pub fn new(
        auth_url: impl Into<String>,
        account_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(TOKEN_TIMEOUT)
            .build()
            .expect("failed to build token HTTP client");
        Self {
            http,
            auth_url: auth_url.into(),
            account_id: account_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cache: Mutex::new(None),
        }
    }

    /// Returns a valid token, fetching a fresh one when the cached copy is
    /// absent or within the expiry buffer.
    pub async fn get_token(&self, cancel: &CancellationToken) -> Result<Token, AuthError> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref() {
            if token.is_valid_at(Utc::now()) {
                return Ok(token.clone());
            }
            debug!("cached token is inside the expiry buffer, refreshing");
        }

        let token = self.fetch_token(cancel).await?;
        info!(expires_at = %token.expires_at, "obtained fresh access token");
        *cache = Some(token.clone());
        Ok(token)
    }

    /// Drops the cached token so the next call fetches a fresh one.
    pub async fn invalidate(&self) {
        self.cache.lock().await.take();
    }

    /// One POST to the token endpoint; no retries at this layer.
    async fn fetch_token(&self, cancel: &CancellationToken) -> Result<Token, AuthError> {
        let send = self
            .http
            .post(&self.auth_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "account_credentials"),
                ("account_id", self.account_id.as_str()),
            ])
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            result = send => result.map_err(|e| AuthError::RequestFailed(e.to_string()))?,
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            // Surface the upstream's own error/reason pair when the body is
            // recognizable; otherwise report the bare status.
            if let Ok(err) = serde_json::from_str::<TokenErrorBody>(&body) {
                if err.error.is_some() || err.reason.is_some() {
                    return Err(AuthError::Rejected {
                        error: err
                            .error
                            .unwrap_or_else(|| format!("http_{}", status.as_u16())),
                        reason: err.reason.unwrap_or_default(),
                    });
                }
            }
            return Err(AuthError::RequestFailed(format!(
                "token endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::ResponseParsing(e.to_string()))?;

        Ok(Token {
            access_token: parsed.access_token,
            token_type: parsed.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_at: Utc::now() + ChronoDuration::seconds(parsed.expires_in),
            scopes: parsed
                .scope
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        })
    }
}
