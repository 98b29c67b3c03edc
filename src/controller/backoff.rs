//! Bounded retry of optimistic-concurrency writes
//!
//! `retry_on_conflict` is the single compare-and-swap loop every status
//! setter goes through. Only `Conflict` errors are retried; anything else
//! aborts on the spot.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Exponential backoff with a fixed attempt cap
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Maximum number of attempts (including the first)
    pub steps: u32,
    /// Delay before the second attempt
    pub duration: Duration,
    /// Multiplier applied to the delay after each retry
    pub factor: f64,
}

impl Default for Backoff {
    /// 4 attempts, waiting 10ms, 50ms, 250ms between them
    fn default() -> Self {
        Self {
            steps: 4,
            duration: Duration::from_millis(10),
            factor: 5.0,
        }
    }
}

impl Backoff {
    /// Retry without sleeping (tests)
    pub fn immediate(steps: u32) -> Self {
        Self {
            steps,
            duration: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let nanos = self.duration.as_nanos() as f64 * self.factor.powi(exponent);
        Duration::from_nanos(nanos.round() as u64)
    }
}

/// Errors that can signal an optimistic-concurrency conflict
pub trait Conflicting {
    fn is_conflict(&self) -> bool;
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the
/// backoff budget is spent
///
/// `op` receives the 1-based attempt number so callers can skip the
/// re-read on the first attempt. When the budget is exhausted the last
/// conflict error is returned.
pub async fn retry_on_conflict<T, E, F, Fut>(backoff: &Backoff, mut op: F) -> Result<T, E>
where
    E: Conflicting,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let steps = backoff.steps.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() && attempt < steps => {
                let delay = backoff.delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Write conflict, retrying");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
