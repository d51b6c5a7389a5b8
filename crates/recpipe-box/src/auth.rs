//! Client-credentials token manager for the downstream store.
//!
//! Box uses a client-credentials grant scoped to an enterprise: the
//! pipeline's service account presents `(client_id, client_secret,
//! enterprise_id)` in the form body and receives a short-lived bearer
//! token. Caching and the five-minute expiry buffer mirror the upstream
//! token manager; fetches are likewise not retried at this layer.

use chrono::{Duration as ChronoDuration, Utc};
use recpipe_core::domain::{AuthError, Token};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fixed deadline for token endpoint requests.
const TOKEN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Cached client-credentials tokens for the Box API.
pub struct BoxTokenManager {
    http: reqwest::Client,
    auth_url: String,
    client_id: String,
    client_secret: String,
    enterprise_id: String,
    cache: Mutex<Option<Token>>,
}

impl BoxTokenManager {
    pub fn new(
        auth_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        enterprise_id: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(TOKEN_TIMEOUT)
            .build()
            .expect("failed to build token HTTP client");
        Self {
            http,
            auth_url: auth_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            enterprise_id: enterprise_id.into(),
            cache: Mutex::new(None),
        }
    }

    /// Returns a valid token, refreshing inside the expiry buffer.
    pub async fn get_token(&self, cancel: &CancellationToken) -> Result<Token, AuthError> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref() {
            if token.is_valid_at(Utc::now()) {
                return Ok(token.clone());
            }
            debug!("cached Box token is inside the expiry buffer, refreshing");
        }

        let token = self.fetch_token(cancel).await?;
        info!(expires_at = %token.expires_at, "obtained fresh Box access token");
        *cache = Some(token.clone());
        Ok(token)
    }

    async fn fetch_token(&self, cancel: &CancellationToken) -> Result<Token, AuthError> {
        let send = self
            .http
            .post(&self.auth_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("box_subject_type", "enterprise"),
                ("box_subject_id", self.enterprise_id.as_str()),
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
            if let Ok(err) = serde_json::from_str::<TokenErrorBody>(&body) {
                if err.error.is_some() || err.error_description.is_some() {
                    return Err(AuthError::Rejected {
                        error: err
                            .error
                            .unwrap_or_else(|| format!("http_{}", status.as_u16())),
                        reason: err.error_description.unwrap_or_default(),
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
            scopes: Vec::new(),
        })
    }
}
