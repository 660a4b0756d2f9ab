//! Fiber identity, lifecycle states and terminal outcomes.

use std::fmt;

use tokio::sync::oneshot;
use ulid::Ulid;

use crate::engine::Engine;
use crate::error::{EngineError, FiberError, Result};
use crate::packet::Packet;

/// Component under which a join step finds the outcomes of its children
/// (`Vec<FiberOutcome>`, in completion order).
pub const CHILD_OUTCOMES_COMPONENT_NAME: &str = "childOutcomes";

/// Unique identifier for a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(Ulid);

impl FiberId {
    /// Create a new random fiber ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get the inner ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for FiberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling state of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberState {
    /// Created, waiting for its first slice on a worker.
    Ready,
    /// Currently applying steps on a worker.
    Running,
    /// Dormant until its resumer is used.
    Suspended,
    /// Dormant until a retry timer fires.
    RetryWait,
    /// Dormant until every awaited child is terminal.
    AwaitingChildren,
    /// Chain finished with `Done`.
    Completed,
    /// Chain finished with `Terminate`.
    Failed,
    /// Fiber was cancelled.
    Cancelled,
}

impl FiberState {
    /// Check if the fiber is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the fiber is parked (holds no worker).
    #[must_use]
    pub const fn is_parked(&self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Suspended | Self::RetryWait | Self::AwaitingChildren
        )
    }
}

impl fmt::Display for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::RetryWait => "retry_wait",
            Self::AwaitingChildren => "awaiting_children",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// How a fiber ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiberStatus {
    /// The chain reached `Done`.
    Completed,
    /// The chain terminated with a failure cause.
    Failed(FiberError),
    /// The fiber, or one of its ancestors, was cancelled.
    Cancelled,
}

impl FiberStatus {
    /// Terminal scheduling state matching this status.
    #[must_use]
    pub const fn state(&self) -> FiberState {
        match self {
            Self::Completed => FiberState::Completed,
            Self::Failed(_) => FiberState::Failed,
            Self::Cancelled => FiberState::Cancelled,
        }
    }
}

/// Terminal outcome of a fiber, including the packet it owned.
#[derive(Debug)]
pub struct FiberOutcome {
    /// Fiber that produced this outcome.
    pub fiber_id: FiberId,
    /// How the fiber ended.
    pub status: FiberStatus,
    /// Packet as left by the last step that ran.
    pub packet: Packet,
    /// Name of the last step the fiber entered.
    pub last_step: Option<String>,
    /// Number of `RetryAfter` transitions taken.
    pub retries: u32,
}

impl FiberOutcome {
    /// Whether the chain completed successfully.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self.status, FiberStatus::Completed)
    }

    /// Whether the chain terminated with a failure.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.status, FiberStatus::Failed(_))
    }

    /// Whether the fiber was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.status, FiberStatus::Cancelled)
    }

    /// Failure cause, if the chain terminated with one.
    #[must_use]
    pub const fn failure(&self) -> Option<&FiberError> {
        match &self.status {
            FiberStatus::Failed(cause) => Some(cause),
            FiberStatus::Completed | FiberStatus::Cancelled => None,
        }
    }
}

/// Handle to a submitted root fiber.
#[derive(Debug)]
pub struct FiberHandle {
    id: FiberId,
    engine: Engine,
    outcome: oneshot::Receiver<FiberOutcome>,
}

impl FiberHandle {
    pub(crate) fn new(
        id: FiberId,
        engine: Engine,
        outcome: oneshot::Receiver<FiberOutcome>,
    ) -> Self {
        Self {
            id,
            engine,
            outcome,
        }
    }

    /// Identifier of the root fiber.
    #[must_use]
    pub const fn id(&self) -> FiberId {
        self.id
    }

    /// Current scheduling state, `None` once the fiber is terminal.
    #[must_use]
    pub fn state(&self) -> Option<FiberState> {
        self.engine.state(self.id)
    }

    /// Request cancellation of the fiber and all its descendants.
    pub fn cancel(&self) {
        self.engine.cancel(self.id);
    }

    /// Wait for the terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::OutcomeLost` if the engine dropped the fiber
    /// without reporting an outcome (for example when the runtime shut down).
    pub async fn join(self) -> Result<FiberOutcome> {
        let fiber_id = self.id;
        self.outcome
            .await
            .map_err(|_| EngineError::OutcomeLost { fiber_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(FiberState::Completed.is_terminal());
        assert!(FiberState::Failed.is_terminal());
        assert!(FiberState::Cancelled.is_terminal());
        assert!(!FiberState::Suspended.is_terminal());
        assert!(FiberState::RetryWait.is_parked());
        assert!(!FiberState::Running.is_parked());
    }

    #[test]
    fn test_status_state() {
        assert_eq!(FiberStatus::Cancelled.state(), FiberState::Cancelled);
        assert_eq!(
            FiberStatus::Failed(FiberError::contract_violation("x")).state(),
            FiberState::Failed
        );
    }

    #[test]
    fn test_fiber_ids_unique() {
        assert_ne!(FiberId::new(), FiberId::new());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(FiberState::AwaitingChildren.to_string(), "awaiting_children");
    }
}
