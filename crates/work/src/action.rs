//! Verdicts returned by steps.

use std::fmt;
use std::time::Duration;

use crate::engine::Resumer;
use crate::error::FiberError;
use crate::packet::Packet;
use crate::step::StepRef;

/// How the engine should continue after a step ran.
pub enum NextAction {
    /// Run the given step immediately on the same fiber and worker.
    Invoke(StepRef),
    /// Release the worker; the fiber stays dormant until resumed.
    Suspend(Suspension),
    /// Re-run `step` after `delay` without advancing the chain.
    RetryAfter { delay: Duration, step: StepRef },
    /// The chain finished successfully.
    Done,
    /// The chain finished with a failure.
    Terminate(FiberError),
}

impl NextAction {
    /// Continue with `next`, or finish when the chain has no successor.
    #[must_use]
    pub fn proceed(next: Option<&StepRef>) -> Self {
        next.map_or(Self::Done, |step| Self::Invoke(step.clone()))
    }

    /// Suspend; `on_suspend` receives the resumer once the fiber is parked.
    ///
    /// Resuming without a target re-enters the step that suspended.
    pub fn suspend<F>(on_suspend: F) -> Self
    where
        F: FnOnce(Resumer) + Send + 'static,
    {
        Self::Suspend(Suspension {
            on_suspend: Box::new(on_suspend),
            resume_at: None,
        })
    }

    /// Suspend and resume at `resume_at` instead of the suspending step.
    pub fn suspend_then<F>(resume_at: StepRef, on_suspend: F) -> Self
    where
        F: FnOnce(Resumer) + Send + 'static,
    {
        Self::Suspend(Suspension {
            on_suspend: Box::new(on_suspend),
            resume_at: Some(resume_at),
        })
    }

    /// Re-run `step` after `delay`.
    #[must_use]
    pub fn retry_after(delay: Duration, step: StepRef) -> Self {
        Self::RetryAfter { delay, step }
    }

    /// Terminate the chain with a step failure.
    pub fn fail(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Terminate(FiberError::step_failed(step, reason))
    }

    /// Run `children` as child fibers and continue at `join` once every one
    /// of them is terminal.
    ///
    /// The join step finds the children's outcomes in the packet under
    /// [`CHILD_OUTCOMES_COMPONENT_NAME`](crate::fiber::CHILD_OUTCOMES_COMPONENT_NAME).
    #[must_use]
    pub fn fork_join(children: Vec<(StepRef, Packet)>, join: StepRef) -> Self {
        Self::suspend(move |resumer| resumer.fork(children, join))
    }

    /// Variant name (for logging).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Invoke(_) => "invoke",
            Self::Suspend(_) => "suspend",
            Self::RetryAfter { .. } => "retry_after",
            Self::Done => "done",
            Self::Terminate(_) => "terminate",
        }
    }
}

impl fmt::Debug for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invoke(step) => f.debug_tuple("Invoke").field(&step.name()).finish(),
            Self::Suspend(suspension) => f.debug_tuple("Suspend").field(suspension).finish(),
            Self::RetryAfter { delay, step } => f
                .debug_struct("RetryAfter")
                .field("delay", delay)
                .field("step", &step.name())
                .finish(),
            Self::Done => write!(f, "Done"),
            Self::Terminate(cause) => f.debug_tuple("Terminate").field(cause).finish(),
        }
    }
}

/// Payload of [`NextAction::Suspend`].
pub struct Suspension {
    pub(crate) on_suspend: Box<dyn FnOnce(Resumer) + Send>,
    pub(crate) resume_at: Option<StepRef>,
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("resume_at", &self.resume_at.as_ref().map(|s| s.name().to_string()))
            .finish_non_exhaustive()
    }
}
