//! Call factory serving scripted responses, for tests and simulations.
//!
//! Responses are defined up front and matched against issued calls in order
//! of definition:
//!
//! ```ignore
//! let factory = CannedCallFactory::new();
//! factory.expect("deleteIngress").with_namespace("ns1").with_name("ing").failing_with(409);
//! factory.expect("listPod").with_namespace("ns1").returning(json!({"items": [pod1, pod2]}));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::factory::{CallCompletion, CallFactory, CallHandle};
use crate::params::RequestParams;
use crate::response::{CallFailure, CallResponse, Headers};

const HTTP_OK: u16 = 200;
const HTTP_NOT_FOUND: u16 = 404;

/// Errors reported by [`CannedCallFactory::verify_all_invoked`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CannedError {
    #[error("canned responses never invoked: {}", unused.join(", "))]
    UnusedResponses { unused: Vec<String> },
}

#[derive(Debug, Clone)]
enum Reply {
    Returning(Value),
    FailingWith(u16),
    Never,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Returning(_) => write!(f, "returning"),
            Self::FailingWith(status) => write!(f, "failing with {status}"),
            Self::Never => write!(f, "never completing"),
        }
    }
}

#[derive(Debug, Clone)]
struct CannedResponse {
    method: String,
    namespace: Option<String>,
    name: Option<String>,
    label_selector: Option<String>,
    field_selector: Option<String>,
    reply: Reply,
    remaining: usize,
}

impl CannedResponse {
    fn matches(&self, params: &RequestParams) -> bool {
        fn qualifier(expected: Option<&String>, actual: Option<&String>) -> bool {
            expected.is_none_or(|e| actual == Some(e))
        }

        self.remaining > 0
            && self.method == params.method
            && qualifier(self.namespace.as_ref(), params.namespace.as_ref())
            && qualifier(self.name.as_ref(), params.name.as_ref())
            && qualifier(self.label_selector.as_ref(), params.label_selector.as_ref())
            && qualifier(self.field_selector.as_ref(), params.field_selector.as_ref())
    }
}

impl fmt::Display for CannedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.method)?;
        if let Some(ns) = &self.namespace {
            write!(f, " namespace={ns}")?;
        }
        if let Some(name) = &self.name {
            write!(f, " name={name}")?;
        }
        if let Some(selector) = &self.label_selector {
            write!(f, " labels={selector}")?;
        }
        if let Some(selector) = &self.field_selector {
            write!(f, " fields={selector}")?;
        }
        write!(f, " {} (x{})", self.reply, self.remaining)
    }
}

#[derive(Debug, Default)]
struct CannedState {
    responses: Vec<CannedResponse>,
    calls: Vec<RequestParams>,
    unmatched: Vec<RequestParams>,
    cancelled: usize,
}

/// [`CallFactory`] that answers calls from a script.
///
/// Calls without a matching response complete with a 404 failure and are
/// recorded as unmatched.
#[derive(Debug, Clone, Default)]
pub struct CannedCallFactory {
    state: Arc<Mutex<CannedState>>,
    delay: Option<Duration>,
}

impl CannedCallFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete calls after `delay` on the tokio runtime instead of inline.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Define a response for calls to `method`.
    pub fn expect(&self, method: impl Into<String>) -> CannedResponseBuilder<'_> {
        CannedResponseBuilder {
            factory: self,
            response: CannedResponse {
                method: method.into(),
                namespace: None,
                name: None,
                label_selector: None,
                field_selector: None,
                reply: Reply::Never,
                remaining: 1,
            },
        }
    }

    /// Every call issued so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RequestParams> {
        self.state.lock().calls.clone()
    }

    /// Calls that matched no response.
    #[must_use]
    pub fn unmatched_calls(&self) -> Vec<RequestParams> {
        self.state.lock().unmatched.clone()
    }

    /// Number of call handles cancelled.
    #[must_use]
    pub fn cancelled_calls(&self) -> usize {
        self.state.lock().cancelled
    }

    /// Check that every defined response was used up.
    ///
    /// # Errors
    ///
    /// Returns `CannedError::UnusedResponses` listing the leftovers.
    pub fn verify_all_invoked(&self) -> Result<(), CannedError> {
        let unused: Vec<String> = self
            .state
            .lock()
            .responses
            .iter()
            .filter(|r| r.remaining > 0)
            .map(ToString::to_string)
            .collect();

        if unused.is_empty() {
            Ok(())
        } else {
            Err(CannedError::UnusedResponses { unused })
        }
    }

    fn define(&self, response: CannedResponse) {
        self.state.lock().responses.push(response);
    }

    /// Pick the reply for a call, consuming one use of the matching response.
    fn reply_for(&self, params: &RequestParams) -> Option<Reply> {
        let mut state = self.state.lock();
        state.calls.push(params.clone());

        let reply = state.responses.iter_mut().find(|r| r.matches(params)).map(|r| {
            r.remaining = r.remaining.saturating_sub(1);
            r.reply.clone()
        });
        if reply.is_none() {
            state.unmatched.push(params.clone());
        }
        reply
    }

    fn cancel_handle(&self) -> impl FnOnce() + Send + 'static {
        let state = Arc::clone(&self.state);
        move || {
            let mut state = state.lock();
            state.cancelled = state.cancelled.saturating_add(1);
        }
    }
}

impl CallFactory for CannedCallFactory {
    fn issue(
        &self,
        params: &RequestParams,
        completion: CallCompletion,
        _timeout: Duration,
    ) -> CallHandle {
        let response = match self.reply_for(params) {
            Some(Reply::Returning(value)) => CallResponse::success(value, HTTP_OK, Headers::new()),
            Some(Reply::FailingWith(status)) => CallResponse::failed(
                CallFailure::api(format!("canned failure for {params}")),
                status,
                Headers::new(),
            ),
            Some(Reply::Never) => {
                debug!(call = %params, "Canned call never completes");
                let cancel = self.cancel_handle();
                return CallHandle::new(move || {
                    drop(completion);
                    cancel();
                });
            }
            None => {
                warn!(call = %params, "No canned response defined for call");
                CallResponse::failed(
                    CallFailure::api(format!("no canned response for {params}")),
                    HTTP_NOT_FOUND,
                    Headers::new(),
                )
            }
        };

        let runtime = self.delay.and_then(|d| Handle::try_current().ok().map(|h| (d, h)));
        match runtime {
            Some((delay, runtime)) => {
                let task = runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    completion.complete(response);
                });
                let cancel = self.cancel_handle();
                CallHandle::new(move || {
                    task.abort();
                    cancel();
                })
            }
            None => {
                completion.complete(response);
                CallHandle::detached()
            }
        }
    }
}

/// Qualifies and finishes a canned response definition.
#[must_use = "a canned response is only defined once finished with returning, failing_with or never_completing"]
pub struct CannedResponseBuilder<'a> {
    factory: &'a CannedCallFactory,
    response: CannedResponse,
}

impl CannedResponseBuilder<'_> {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.response.namespace = Some(namespace.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.response.name = Some(name.into());
        self
    }

    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.response.label_selector = Some(selector.into());
        self
    }

    pub fn with_field_selector(mut self, selector: impl Into<String>) -> Self {
        self.response.field_selector = Some(selector.into());
        self
    }

    /// Serve this response `count` times.
    pub fn times(mut self, count: usize) -> Self {
        self.response.remaining = count;
        self
    }

    /// Succeed with `value`.
    pub fn returning(mut self, value: Value) {
        self.response.reply = Reply::Returning(value);
        self.factory.define(self.response);
    }

    /// Fail with an API error carrying `status`.
    pub fn failing_with(mut self, status: u16) {
        self.response.reply = Reply::FailingWith(status);
        self.factory.define(self.response);
    }

    /// Never complete; the caller's timeout decides.
    pub fn never_completing(mut self) {
        self.response.reply = Reply::Never;
        self.factory.define(self.response);
    }
}

impl fmt::Debug for CannedResponseBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CannedResponseBuilder")
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}
