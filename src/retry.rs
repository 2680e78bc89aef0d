use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::warn;

// ================================================================================================
// Backoff
// ================================================================================================

/// Exponential backoff schedule for optimistic-conflict and transient-store
/// retries: base, 2x, 4x, ... with up to 20% additive jitter so competing
/// writers do not re-collide in lockstep.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    max_retries: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max_retries: u32) -> Self {
        Self { base, max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry `attempt` (1-based). `None` once the budget is
    /// exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let exp = self.base.saturating_mul(1 << (attempt - 1));
        let jitter_cap = (exp.as_millis() as u64 / 5).max(1);
        let jitter = rand::rng().random_range(0..jitter_cap);
        Some(exp + Duration::from_millis(jitter))
    }
}

// ================================================================================================
// Circuit breaker
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Minimal circuit breaker guarding hotpath store calls.
///
/// Closed counts consecutive failures; at the threshold it opens and rejects
/// immediately for `open_for`, then lets a single probe through (half-open).
/// A probe success closes the breaker, a probe failure re-opens it. Callers
/// that are rejected surface a retryable error so the client buffers and
/// retries instead of stacking up on a struggling store.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<(BreakerState, u32)>,
    failure_threshold: u32,
    open_for: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_for: Duration) -> Self {
        Self {
            state: Mutex::new((BreakerState::Closed, 0)),
            failure_threshold,
            open_for,
        }
    }

    /// Whether a call may proceed right now.
    pub fn allow(&self) -> bool {
        let mut guard = self.state.lock().expect("breaker lock poisoned");
        match guard.0 {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open { since } => {
                if since.elapsed() >= self.open_for {
                    guard.0 = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut guard = self.state.lock().expect("breaker lock poisoned");
        *guard = (BreakerState::Closed, 0);
    }

    pub fn record_failure(&self) {
        let mut guard = self.state.lock().expect("breaker lock poisoned");
        match guard.0 {
            BreakerState::HalfOpen => {
                warn!("circuit breaker probe failed, reopening");
                guard.0 = BreakerState::Open {
                    since: Instant::now(),
                };
            }
            BreakerState::Closed => {
                guard.1 += 1;
                if guard.1 >= self.failure_threshold {
                    warn!(failures = guard.1, "circuit breaker opened");
                    guard.0 = BreakerState::Open {
                        since: Instant::now(),
                    };
                }
            }
            BreakerState::Open { .. } => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.state.lock().expect("breaker lock poisoned").0,
            BreakerState::Open { .. }
        )
    }
}
