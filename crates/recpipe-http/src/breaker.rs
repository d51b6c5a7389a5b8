//! Circuit breaker for a single transport instance.
//!
//! Three states:
//!
//! - **closed**: requests flow; consecutive failures are counted
//! - **open**: requests are rejected immediately until `recovery_timeout`
//!   has elapsed
//! - **half-open**: one trial request is allowed; success closes the
//!   circuit, failure re-opens it
//!
//! Thread safety is a single `Mutex` around the mutable state, matching the
//! rest of the pipeline's shared-resource handling.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial request
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Failure gate shared by all requests of one transport instance.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Whether a request may be sent right now.
    ///
    /// An open circuit whose recovery timeout has elapsed transitions to
    /// half-open and allows this one call through as the trial.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery_timeout {
                    info!("circuit breaker entering half-open, allowing trial request");
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful call: closes the circuit and resets the count.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != BreakerState::Closed {
            info!("circuit breaker closing after successful trial");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Records a failed call.
    ///
    /// In half-open, any failure re-opens the circuit immediately. In
    /// closed, the circuit opens once `failure_threshold` consecutive
    /// failures accumulate.
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures += 1;
        let trip = inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.config.failure_threshold;
        if trip && inner.state != BreakerState::Open {
            warn!(
                failures = inner.consecutive_failures,
                "circuit breaker opening"
            );
        }
        if trip {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    /// Current state (transitions only happen inside `allow_request` /
    /// `on_success` / `on_failure`; this is a plain read).
    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }
}
