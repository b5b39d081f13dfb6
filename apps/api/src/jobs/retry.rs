use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::generation::GenerationError;

use super::request::UseCase;

pub const SINGLE_ARTIFACT_ATTEMPTS: u32 = 3;
pub const VARIATION_ATTEMPTS: u32 = 2;

/// Attempt budget with exponential backoff: `base_delay * 2^(attempt - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Variation budgets apply per variation, not per batch.
    pub fn for_use_case(use_case: &UseCase, base_delay: Duration) -> Self {
        let max_attempts = match use_case {
            UseCase::GenerateVariations { .. } => VARIATION_ATTEMPTS,
            _ => SINGLE_ARTIFACT_ATTEMPTS,
        };
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// budget is spent. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, GenerationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{label} attempt {attempt}/{} failed: {e}. Retrying in {delay:?}",
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
