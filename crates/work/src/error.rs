//! Error types for the work crate.

use thiserror::Error;

use crate::fiber::FiberId;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the engine itself (submission, lifecycle).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine is draining and no longer accepts fibers.
    #[error("engine is shutting down, fiber rejected")]
    ShuttingDown,

    /// No tokio runtime was available to host the worker pool.
    #[error("no tokio runtime available: {reason}")]
    NoRuntime { reason: String },

    /// The fiber finished without delivering its outcome.
    #[error("outcome of fiber '{fiber_id}' was lost")]
    OutcomeLost { fiber_id: FiberId },
}

/// Failure cause carried by a fiber that terminated unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FiberError {
    /// A step decided the chain cannot continue.
    #[error("step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    /// A step panicked while running; the fiber is aborted.
    #[error("step '{step}' panicked: {message}")]
    StepPanicked { step: String, message: String },

    /// The step/engine protocol was broken.
    #[error("contract violation: {reason}")]
    ContractViolation { reason: String },
}

impl FiberError {
    /// Create a step failed error.
    pub fn step_failed(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StepFailed {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Create a step panicked error.
    pub fn step_panicked(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepPanicked {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create a contract violation error.
    pub fn contract_violation(reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            reason: reason.into(),
        }
    }
}
