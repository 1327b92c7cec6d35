//! Exponential backoff with jitter for model calls.

use super::LlmError;
use crate::config::LlmConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry policy shared by the plan and generate passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt.
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the uniform jitter added to each delay.
    pub jitter: Duration,
}

/// Result of a retried call together with the number of attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    /// Final result.
    pub result: Result<T, LlmError>,
    /// Attempts made, at least one.
    pub attempts: u32,
}

impl<T> Attempted<T> {
    /// Attempts beyond the first.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

impl From<&LlmConfig> for RetryPolicy {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the delay after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Backoff plus uniform random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..jitter_ms))
        };
        self.backoff(attempt) + jitter
    }

    /// Run `operation` until it succeeds, fails fatally, or attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(error) if error.is_fatal() || attempt >= max_attempts => {
                    return Attempted {
                        result: Err(error),
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        call = label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Model call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
