//! Asynchronous remote calls as fiber steps.
//!
//! An [`AsyncRequestStep`] issues one call through a [`CallFactory`], parks
//! its fiber until the response or the timeout arrives, retries transient
//! failures according to a [`RetryPolicy`], and leaves the final
//! [`CallResponse`] in the packet under [`RESPONSE_COMPONENT_NAME`].
//!
//! # Example
//!
//! ```ignore
//! use operator_calls::{AsyncRequestStep, CannedCallFactory, RequestParams, response_from};
//! use operator_work::{ChainBuilder, NextAction};
//!
//! let factory = Arc::new(CannedCallFactory::new());
//! factory.expect("listPod").with_namespace("ns1").returning(json!({"items": []}));
//!
//! let head = ChainBuilder::new()
//!     .then(move |next| {
//!         AsyncRequestStep::builder(RequestParams::new("listPod").in_namespace("ns1"), factory)
//!             .next(next)
//!             .build()
//!     })
//!     .then_fn("inspect", |packet, next| {
//!         let listed = response_from(packet).is_some_and(|r| r.is_success());
//!         packet.put("listed", listed);
//!         NextAction::proceed(next)
//!     })
//!     .build();
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod canned;
pub mod factory;
pub mod params;
pub mod request_step;
pub mod response;
pub mod response_step;
pub mod retry;

pub use canned::{CannedCallFactory, CannedError, CannedResponseBuilder};
pub use factory::{CallCompletion, CallFactory, CallHandle};
pub use params::RequestParams;
pub use request_step::{
    AsyncRequestStep, AsyncRequestStepBuilder, RESPONSE_COMPONENT_NAME, RETRY_COMPONENT_NAME,
    RetryState, response_from,
};
pub use response::{CallFailure, CallResponse, FailureKind, Headers, NO_STATUS};
pub use response_step::{ResponseStep, ResponseStepBuilder};
pub use retry::{Backoff, MIN_RETRY_DELAY, ResponseClass, RetryPolicy};
