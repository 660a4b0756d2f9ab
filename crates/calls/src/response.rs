//! Result of a remote call.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Response headers, by name.
pub type Headers = BTreeMap<String, Vec<String>>;

/// Status code used when no remote status exists (timeouts, transport errors).
pub const NO_STATUS: u16 = 0;

/// Category of a call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The remote API answered with an error status.
    Api,
    /// The call never reached the API or its answer was lost.
    Transport,
    /// No answer within the call timeout.
    Timeout,
    /// The call was abandoned because its fiber was cancelled.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Api => "api",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Why a call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} failure: {message}")]
pub struct CallFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl CallFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Api, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, message)
    }
}

/// Either a result value or a failure, plus the HTTP status and headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    outcome: Result<Value, CallFailure>,
    status_code: u16,
    headers: Headers,
}

impl CallResponse {
    /// A successful response.
    #[must_use]
    pub const fn success(result: Value, status_code: u16, headers: Headers) -> Self {
        Self {
            outcome: Ok(result),
            status_code,
            headers,
        }
    }

    /// A failed response.
    #[must_use]
    pub const fn failed(failure: CallFailure, status_code: u16, headers: Headers) -> Self {
        Self {
            outcome: Err(failure),
            status_code,
            headers,
        }
    }

    /// The response synthesized when a call exceeds its timeout.
    #[must_use]
    pub fn timed_out(timeout: Duration) -> Self {
        Self::failed(
            CallFailure::new(
                FailureKind::Timeout,
                format!("no response within {}ms", timeout.as_millis()),
            ),
            NO_STATUS,
            Headers::new(),
        )
    }

    /// Result value of a successful call.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    /// Failure cause of an unsuccessful call.
    #[must_use]
    pub fn failure(&self) -> Option<&CallFailure> {
        self.outcome.as_ref().err()
    }

    #[must_use]
    pub const fn status_code(&self) -> u16 {
        self.status_code
    }

    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.outcome.is_err()
    }

    /// Convert into the result value or the failure cause.
    ///
    /// # Errors
    ///
    /// Returns the `CallFailure` of an unsuccessful call.
    pub fn into_result(self) -> Result<Value, CallFailure> {
        self.outcome
    }
}
