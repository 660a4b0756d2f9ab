#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Domain operator
//!
//! Binary support for the fiber engine: the command line and the canned
//! reference run. The engine itself lives in `operator-work` and remote calls
//! in `operator-calls`.

pub use operator_calls;
pub use operator_core;
pub use operator_work;

pub mod cli;
pub mod simulate;
