//! Which responses to retry, and how long to wait before doing so.

use std::time::Duration;

use operator_core::{BackoffSettings, CallSettings};

use crate::response::{CallResponse, FailureKind, NO_STATUS};

/// Shortest delay ever returned by [`RetryPolicy::delay_for`].
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

const CONFLICT: u16 = 409;
const NOT_FOUND: u16 = 404;
const TOO_MANY_REQUESTS: u16 = 429;

/// How a response is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// Continue with the response.
    Success,
    /// Transient; try the call again.
    Retryable,
    /// Give up and hand the failure to the next step.
    Terminal,
}

/// Delay curve between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed(Duration),
    /// `initial * multiplier^(attempt - 1)`, capped at `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => {
                if initial.is_zero() {
                    return Duration::ZERO;
                }
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let factor = multiplier.max(1.0).powi(exponent);
                let secs = (initial.as_secs_f64() * factor).min(max.as_secs_f64());
                Duration::try_from_secs_f64(secs).unwrap_or(*max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&BackoffSettings::default())
    }
}

impl From<&BackoffSettings> for Backoff {
    fn from(settings: &BackoffSettings) -> Self {
        match settings {
            BackoffSettings::Fixed { delay_ms } => Self::Fixed(Duration::from_millis(*delay_ms)),
            BackoffSettings::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => Self::Exponential {
                initial: Duration::from_millis(*initial_ms),
                multiplier: *multiplier,
                max: Duration::from_millis(*max_ms),
            },
        }
    }
}

/// Retry rules for one request step.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Treat 404 as transient.
    pub retry_not_found: bool,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
            retry_not_found: false,
        }
    }

    #[must_use]
    pub const fn with_retry_not_found(mut self, retry_not_found: bool) -> Self {
        self.retry_not_found = retry_not_found;
        self
    }

    /// Classify a response.
    ///
    /// Conflicts, throttling, server errors, timeouts and transport failures
    /// are transient. A missing object is terminal unless `retry_not_found`
    /// is set. Everything else, including cancellation, is terminal.
    #[must_use]
    pub fn classify(&self, response: &CallResponse) -> ResponseClass {
        let Some(failure) = response.failure() else {
            return ResponseClass::Success;
        };

        match failure.kind {
            FailureKind::Timeout | FailureKind::Transport => ResponseClass::Retryable,
            FailureKind::Cancelled => ResponseClass::Terminal,
            FailureKind::Api => match response.status_code() {
                NO_STATUS | CONFLICT | TOO_MANY_REQUESTS | 500..=599 => ResponseClass::Retryable,
                NOT_FOUND if self.retry_not_found => ResponseClass::Retryable,
                _ => ResponseClass::Terminal,
            },
        }
    }

    /// Whether another attempt is allowed after `attempts` retries.
    #[must_use]
    pub fn should_retry(&self, response: &CallResponse, attempts: u32) -> bool {
        attempts < self.max_retries && self.classify(response) == ResponseClass::Retryable
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Never below [`MIN_RETRY_DELAY`] and never shorter than the delay for
    /// an earlier attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt).max(MIN_RETRY_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&CallSettings::default())
    }
}

impl From<&CallSettings> for RetryPolicy {
    fn from(settings: &CallSettings) -> Self {
        Self::new(settings.max_retries, Backoff::from(&settings.backoff))
            .with_retry_not_found(settings.retry_not_found)
    }
}
