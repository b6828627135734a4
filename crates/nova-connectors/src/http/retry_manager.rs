//! Retry classification and linear backoff

use crate::error::ConnectorError;
use std::time::Duration;

/// Hard upper bound on attempts per operation, whatever the caller asks for.
pub const MAX_ATTEMPTS_CAP: u32 = 4;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);

/// Classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    Retryable,
    NonRetryable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry { delay: Duration, next_attempt: u32 },
    Stop { reason: &'static str },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY)
    }
}

impl RetryPolicy {
    /// Attempts are clamped to `1..=MAX_ATTEMPTS_CAP`.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS_CAP),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay slept after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Decide what happens after `attempt` failed with `classification`.
    pub fn decide(&self, attempt: u32, classification: ErrorClassification) -> RetryDecision {
        if classification == ErrorClassification::NonRetryable {
            return RetryDecision::Stop {
                reason: "non-retryable failure",
            };
        }
        if attempt >= self.max_attempts {
            return RetryDecision::Stop {
                reason: "attempts exhausted",
            };
        }
        RetryDecision::Retry {
            delay: self.delay_for(attempt),
            next_attempt: attempt + 1,
        }
    }
}

/// Statuses worth another attempt: request timeout, conflict, too early,
/// rate limiting and every server error.
pub fn classify_status_code(status: u16) -> ErrorClassification {
    match status {
        408 | 409 | 425 | 429 => ErrorClassification::Retryable,
        s if s >= 500 => ErrorClassification::Retryable,
        _ => ErrorClassification::NonRetryable,
    }
}

pub fn classify_error(error: &ConnectorError) -> ErrorClassification {
    match error {
        ConnectorError::Timeout(_) | ConnectorError::Connection(_) => {
            ErrorClassification::Retryable
        }
        ConnectorError::Http(e) if !e.is_builder() => ErrorClassification::Retryable,
        ConnectorError::Status { status, .. } => classify_status_code(*status),
        _ => ErrorClassification::NonRetryable,
    }
}
