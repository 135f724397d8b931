//! Bounded retry with fallback
//!
//! One combinator shared by the reasoning chain (3 attempts, 1s apart, then a
//! degraded step) and the speech synthesizer (single attempt by default).

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy: total attempts and the pause between them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    /// Pause before every retry
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

impl RetryPolicy {
    /// A single attempt, no retry
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// `max_attempts` tries with a fixed delay between them
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// `op` receives the 1-based attempt number. The last error is returned when
/// every attempt failed.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Succeeded on attempt {}/{}", attempt, attempts);
                }
                return Ok(value);
            }
            Err(e) if attempt < attempts => {
                warn!("Attempt {}/{} failed: {}", attempt, attempts, e);
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
                attempt += 1;
            }
            Err(e) => {
                warn!("Attempt {}/{} failed, giving up: {}", attempt, attempts, e);
                return Err(e);
            }
        }
    }
}

/// Like [`retry`], but an exhausted policy produces a value from `fallback`
/// instead of an error.
pub async fn retry_with_fallback<T, E, F, Fut, D>(policy: &RetryPolicy, op: F, fallback: D) -> T
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    D: FnOnce(E) -> T,
{
    match retry(policy, op).await {
        Ok(value) => value,
        Err(e) => fallback(e),
    }
}
