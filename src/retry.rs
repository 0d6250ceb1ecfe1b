//! Bounded, fixed-delay retries for idempotent plan service calls

use crate::error::{EngineError, EngineResult};

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed attempt count with constant spacing, no backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Retry immediately, without waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget runs out. Returns the last error on exhaustion.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> EngineResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match op(attempts).await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(operation, attempts, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(operation, attempts, error = %e, "Non-retryable error");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        operation,
                        "Attempt {}/{} failed: {}", attempts, self.max_attempts, e
                    );
                    if attempts >= self.max_attempts {
                        return Err(e);
                    }
                }
            }

            // Wait before retry
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
    }
}

/// Wrap an exhausted plan creation error so callers can tell how hard we tried
pub fn exhausted(attempts: u32, source: EngineError) -> EngineError {
    EngineError::PlanUnavailable {
        attempts,
        source: Box::new(source),
    }
}
