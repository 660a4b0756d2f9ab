//! Core errors and configuration shared by the operator crates.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;

pub use config::{BackoffSettings, CallSettings, EngineSettings, OperatorConfig};
pub use error::{Error, Result};
