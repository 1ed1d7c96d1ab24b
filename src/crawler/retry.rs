//! Retry policy with exponential backoff for transient fetch failures
//!
//! Failures are classified into a [`FailureType`]. Rate limiting is never
//! retried here: it is escalated to the source loop, which owns cool-downs.

use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Maximum jitter added to a retry delay
const MAX_JITTER: Duration = Duration::from_millis(250);

/// Classification of fetch failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Timeouts, connection resets, 408 and 5xx
    Transient,

    /// Anything a retry would not fix (404, 410, other 4xx)
    Permanent,

    /// HTTP 429
    RateLimited,
}

/// Decision on whether to retry a failed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        /// Attempt number of the retry (1-indexed)
        attempt: u32,
    },
    DoNotRetry {
        reason: String,
    },
}

/// Bounded exponential backoff
///
/// ```text
/// delay = min(base_delay * 2^(attempt - 1), max_delay) + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decides what to do after `attempt` (1-indexed) failed
    pub fn should_retry(&self, failure: FailureType, attempt: u32) -> RetryDecision {
        match failure {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure".to_string(),
                }
            }
            FailureType::RateLimited => {
                return RetryDecision::DoNotRetry {
                    reason: "rate limited".to_string(),
                }
            }
            FailureType::Transient => {}
        }

        if attempt > self.max_retries {
            debug!(attempt, max = self.max_retries, "retries exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("{} retries exhausted", self.max_retries),
            };
        }

        let delay = self.delay_for(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "will retry");

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
        backoff + Duration::from_millis(jitter_ms)
    }
}

/// Classifies an HTTP status code
pub fn classify_status(status: u16) -> FailureType {
    match status {
        429 => FailureType::RateLimited,
        408 => FailureType::Transient,
        500..=599 => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}
