//! Retry execution with typed backoff.
//!
//! [`RetryTransport`] owns the retry loop: it asks the caller to build a
//! fresh request for every attempt (so bodies are re-readable), classifies
//! each failure, sleeps according to [`RetryPolicy`], and wraps the last
//! error with the attempt count once the budget is spent. The caller's
//! cancellation token interrupts both the in-flight request and the
//! inter-attempt sleep.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rand::Rng;
use recpipe_core::domain::{ApiError, ErrorCategory};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::classify;

// ============================================================================
// RetryPolicy
// ============================================================================

/// Backoff and retryability configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts before giving up (1 = no retries)
    pub max_attempts: u32,
    /// First delay of the exponential curve
    pub base_delay: Duration,
    /// Exponential growth factor
    pub multiplier: f64,
    /// Cap applied to every computed delay, including `Retry-After`
    pub max_delay: Duration,
    /// Uniform jitter as a percentage of the computed delay, when enabled
    pub jitter_percent: Option<f64>,
    /// Fixed per-category delays that bypass the exponential curve
    pub category_delays: HashMap<ErrorCategory, Duration>,
    /// Categories worth another attempt
    pub retryable: HashSet<ErrorCategory>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_percent: Some(20.0),
            category_delays: HashMap::new(),
            retryable: HashSet::from([
                ErrorCategory::Network,
                ErrorCategory::Timeout,
                ErrorCategory::Server,
                ErrorCategory::RateLimit,
            ]),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt budget and no other changes.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Whether a failure of this category should be retried.
    pub fn is_retryable(&self, category: ErrorCategory) -> bool {
        self.retryable.contains(&category)
    }

    /// Delay before the attempt following attempt `n` (zero-based).
    ///
    /// Order of precedence:
    /// 1. a rate-limit error carrying `Retry-After` uses it, capped at
    ///    `max_delay`, with no jitter (the server named an exact time)
    /// 2. a category-specific override, jittered
    /// 3. `base * multiplier^n` capped at `max_delay`, jittered
    pub fn delay_for(&self, error: &ApiError, attempt: u32) -> Duration {
        if let ApiError::RateLimit {
            retry_after: Some(after),
            ..
        } = error
        {
            return (*after).min(self.max_delay);
        }

        let computed = match self.category_delays.get(&error.category()) {
            Some(fixed) => *fixed,
            None => {
                let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
                Duration::from_secs_f64(secs).min(self.max_delay)
            }
        };
        self.apply_jitter(computed)
    }

    /// Applies uniform ±`jitter_percent`% noise, flooring at 10% of the
    /// pre-jitter delay so the result never collapses to zero.
    fn apply_jitter(&self, delay: Duration) -> Duration {
        let percent = match self.jitter_percent {
            Some(p) if p > 0.0 => p,
            _ => return delay,
        };
        let base = delay.as_secs_f64();
        let spread = base * (percent / 100.0);
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        let floor = base * 0.10;
        Duration::from_secs_f64((base + offset).max(floor))
    }
}

// ============================================================================
// RetryTransport
// ============================================================================

/// Executes HTTP requests with retry, backoff, and optional circuit
/// breaking.
///
/// One instance per API host; the breaker (when present) is shared by all
/// requests going through the instance.
pub struct RetryTransport {
    client: reqwest::Client,
    policy: RetryPolicy,
    breaker: Option<CircuitBreaker>,
}

impl RetryTransport {
    pub fn new(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            breaker: None,
        }
    }

    /// Attaches a circuit breaker, builder-style.
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// The underlying client, for requests that manage their own retries
    /// (e.g. the ranged downloader's resume envelope).
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes a request, building it fresh for each attempt.
    ///
    /// `build` receives the underlying client and must return a complete
    /// `RequestBuilder`; it is called once per attempt so request bodies
    /// are never re-read. Returns the response on the first success, the
    /// classified error immediately for non-retryable categories, or
    /// [`ApiError::Exhausted`] once `max_attempts` failures accumulate.
    pub async fn execute<F>(
        &self,
        cancel: &CancellationToken,
        build: F,
    ) -> Result<reqwest::Response, ApiError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_err: Option<ApiError> = None;

        for attempt in 0..max_attempts {
            if let Some(breaker) = &self.breaker {
                if !breaker.allow_request() {
                    return Err(ApiError::CircuitOpen);
                }
            }
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                result = build(&self.client).send() => result,
            };

            let err = match result {
                Ok(response) if response.status().is_success() => {
                    if let Some(breaker) = &self.breaker {
                        breaker.on_success();
                    }
                    if attempt > 0 {
                        debug!(attempt, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status();
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(classify::parse_retry_after);
                    let body = response.text().await.unwrap_or_default();
                    classify::error_for_status(status, retry_after, &body)
                }
                Err(e) => classify::classify_reqwest_error(&e),
            };

            let category = err.category();

            // Only service-health failures feed the breaker; a 4xx is a
            // well-formed answer, not an outage signal.
            if matches!(
                category,
                ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Server
            ) {
                if let Some(breaker) = &self.breaker {
                    breaker.on_failure();
                }
            }

            if !self.policy.is_retryable(category) {
                return Err(err);
            }

            warn!(error = %err, attempt, "retryable request failure");

            if attempt + 1 >= max_attempts {
                last_err = Some(err);
                break;
            }

            let delay = self.policy.delay_for(&err, attempt);
            last_err = Some(err);
            tokio::select! {
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Err(ApiError::Exhausted {
            attempts: max_attempts,
            source: Box::new(
                last_err.unwrap_or_else(|| ApiError::Unknown("retry loop produced no error".into())),
            ),
        })
    }
}
