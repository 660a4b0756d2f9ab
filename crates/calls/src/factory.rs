//! The capability that actually issues remote calls.

use std::fmt;
use std::time::Duration;

use crate::params::RequestParams;
use crate::response::CallResponse;

/// Issues asynchronous remote calls.
///
/// `issue` must return promptly; the response is delivered later through
/// the [`CallCompletion`], from any thread. Implementations may ignore
/// `timeout`; the request step enforces it independently.
pub trait CallFactory: Send + Sync {
    /// Start a call and return a handle that can abandon it.
    fn issue(
        &self,
        params: &RequestParams,
        completion: CallCompletion,
        timeout: Duration,
    ) -> CallHandle;
}

type Deliver = Box<dyn FnOnce(CallResponse) + Send>;

/// Single-use response sink for one call.
pub struct CallCompletion {
    deliver: Deliver,
}

impl CallCompletion {
    pub fn new<F>(deliver: F) -> Self
    where
        F: FnOnce(CallResponse) + Send + 'static,
    {
        Self {
            deliver: Box::new(deliver),
        }
    }

    /// Deliver the response.
    pub fn complete(self, response: CallResponse) {
        (self.deliver)(response);
    }
}

impl fmt::Debug for CallCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallCompletion").finish_non_exhaustive()
    }
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Abandons an outstanding call.
pub struct CallHandle {
    cancel: Option<CancelFn>,
}

impl CallHandle {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle for a call that cannot be abandoned.
    #[must_use]
    pub const fn detached() -> Self {
        Self { cancel: None }
    }

    /// Abandon the call. The completion may still fire afterwards.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Headers;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

    #[test]
    fn test_completion_delivers_once() {
        let seen = Arc::new(AtomicU16::new(0));
        let sink = Arc::clone(&seen);
        let completion = CallCompletion::new(move |response: CallResponse| {
            sink.store(response.status_code(), Ordering::SeqCst);
        });

        completion.complete(CallResponse::success(serde_json::Value::Null, 204, Headers::new()));
        assert_eq!(seen.load(Ordering::SeqCst), 204);
    }

    #[test]
    fn test_handle_cancel_runs_callback() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        CallHandle::new(move || flag.store(true, Ordering::SeqCst)).cancel();
        assert!(cancelled.load(Ordering::SeqCst));

        // Nothing to run.
        CallHandle::detached().cancel();
    }
}
