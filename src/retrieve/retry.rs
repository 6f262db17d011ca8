//! Retry logic with exponential backoff for transient retrieval failures.
//!
//! Failed downloads are classified into a [`FailureType`]; the
//! [`RetryPolicy`] decides whether to try again and after what delay.
//! Delays grow exponentially with a random jitter so parallel clients do
//! not re-synchronize on the server.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::error::RetrieveError;

/// Default maximum retry attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of retrieval failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry (timeouts, 5xx).
    Transient,

    /// Failure that won't succeed regardless of retries (404, bad input).
    Permanent,

    /// Authentication or entitlement problem; retrying without a better
    /// session cannot help.
    AccessDenied,

    /// Server rate limiting (HTTP 429); retried with backoff.
    RateLimited,
}

/// Decision on whether to retry a failed retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// Delay calculation: `min(base * multiplier^(attempt-1), max) + jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings. `max_attempts` includes the
    /// initial attempt and is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom attempt count and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether the attempt that just failed should be retried.
    /// `attempt` is 1-indexed.
    #[must_use]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure".to_string(),
                };
            }
            FailureType::AccessDenied => {
                return RetryDecision::DoNotRetry {
                    reason: "access denied; retrying cannot help".to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry {
                reason: format!("exhausted {} attempts", self.max_attempts),
            };
        }

        let delay = self.delay_for_attempt(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling retry");
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Backoff delay for the attempt that just failed (1-indexed), with
    /// jitter applied.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = self.backoff_multiplier.powi(exponent as i32);
        let scaled = self.base_delay.mul_f32(factor).min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
        scaled + Duration::from_millis(jitter_ms)
    }
}

/// Classifies a retrieval error for retry purposes.
#[must_use]
pub fn classify_error(error: &RetrieveError) -> FailureType {
    match error {
        RetrieveError::Network { .. } | RetrieveError::Timeout { .. } => FailureType::Transient,
        RetrieveError::HttpStatus { status, .. } => match status {
            429 => FailureType::RateLimited,
            s if *s >= 500 => FailureType::Transient,
            _ => FailureType::Permanent,
        },
        RetrieveError::AccessDenied { .. } => FailureType::AccessDenied,
        RetrieveError::Io { .. }
        | RetrieveError::MissingFilename { .. }
        | RetrieveError::InvalidCalibScope { .. }
        | RetrieveError::CalSelector { .. } => FailureType::Permanent,
    }
}
