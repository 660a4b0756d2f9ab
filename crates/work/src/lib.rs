//! Fiber engine for resumable step chains.
//!
//! Reconciliation logic is written as a chain of small [`Step`]s that share a
//! per-run [`Packet`]. The [`Engine`] runs each submitted chain as a
//! lightweight fiber multiplexed onto a fixed pool of tokio worker threads:
//!
//! - **Suspend/resume**: a step that waits on I/O returns
//!   [`NextAction::Suspend`] and releases its worker; a single-use
//!   [`Resumer`] brings the fiber back.
//! - **Retry**: [`NextAction::RetryAfter`] re-runs a step after a delay
//!   without holding a worker.
//! - **Fork/join**: a fiber can start child fibers and continue once all of
//!   them are terminal.
//! - **Cancellation**: cancelling a fiber cancels its descendants and fires
//!   the cancel hooks of outstanding work.
//! - **Drain**: shutdown stops accepting fibers, waits a grace period, then
//!   force-cancels the rest.
//!
//! # Example
//!
//! ```ignore
//! use operator_work::{ChainBuilder, Engine, NextAction, Packet};
//!
//! let engine = Engine::current(settings.engine.clone())?;
//! let head = ChainBuilder::new()
//!     .then_fn("mark", |packet, next| {
//!         packet.put("x", 1);
//!         NextAction::proceed(next)
//!     })
//!     .build()
//!     .ok_or("empty chain")?;
//!
//! let outcome = engine.submit(head, Packet::new())?.join().await?;
//! assert!(outcome.is_completed());
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod action;
pub mod engine;
pub mod error;
pub mod fiber;
pub mod packet;
pub mod step;

pub use action::{NextAction, Suspension};
pub use engine::{DrainReport, Engine, Resumer, TimerHandle};
pub use error::{EngineError, FiberError, Result};
pub use fiber::{
    CHILD_OUTCOMES_COMPONENT_NAME, FiberHandle, FiberId, FiberOutcome, FiberState, FiberStatus,
};
pub use packet::Packet;
pub use step::{ChainBuilder, FnStep, Step, StepRef, chain_len, chain_names};
