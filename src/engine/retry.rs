// src/engine/retry.rs

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::Result;

/// Upper bound on a single back-off sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Attempt budget with exponential back-off.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1).
    pub max_attempts: u32,
    pub delay: Duration,
    /// Multiplier applied to the delay after each failure.
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
            backoff: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, backoff: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Sleep before the next attempt after `failures` failed ones.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 || self.delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = self.backoff.max(1.0).powi(failures.saturating_sub(1) as i32);
        let nanos = (self.delay.as_nanos() as f64 * factor).round();
        let capped = nanos.min(MAX_RETRY_DELAY.as_nanos() as f64);
        Duration::from_nanos(capped as u64)
    }

    /// Run `op` until it succeeds or the budget is spent.
    pub async fn run<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        op = name,
                        attempt,
                        max_attempts = max,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
