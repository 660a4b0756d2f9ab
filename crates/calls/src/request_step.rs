//! Step that performs one remote call without holding a worker.
//!
//! Applying the step suspends the fiber and issues the call through a
//! [`CallFactory`]. The fiber resumes when the factory completes the call or
//! the per-attempt timeout fires, whichever happens first. Transient failures
//! are retried with backoff through [`NextAction::RetryAfter`]; the final
//! response is left in the packet for the next step.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use operator_core::CallSettings;
use operator_work::{FiberError, NextAction, Packet, Resumer, Step, StepRef, TimerHandle};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::factory::{CallCompletion, CallFactory, CallHandle};
use crate::params::RequestParams;
use crate::response::CallResponse;
use crate::retry::{ResponseClass, RetryPolicy};

/// Packet component holding the final [`CallResponse`] of a request step.
pub const RESPONSE_COMPONENT_NAME: &str = "response";

/// Packet component holding the [`RetryState`] of an ongoing request.
pub const RETRY_COMPONENT_NAME: &str = "retry";

/// Retries taken so far by the request step currently running on a fiber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
}

/// The response left by the last request step, if any.
#[must_use]
pub fn response_from(packet: &Packet) -> Option<&CallResponse> {
    packet.component(RESPONSE_COMPONENT_NAME)
}

/// Lifecycle of a single attempt.
enum AttemptState {
    Idle,
    Calling(Resumer),
    Succeeded,
    Failed,
    TimedOut,
    Abandoned,
}

impl AttemptState {
    const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Calling(_) => "calling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Abandoned => "abandoned",
        }
    }
}

struct Attempt {
    state: AttemptState,
    handle: Option<CallHandle>,
    timer: Option<TimerHandle>,
}

/// Completion latch shared by the callback, the timeout and the cancel hook.
///
/// Only the first of them to settle the attempt gets the resumer.
struct PendingCall {
    attempt: Mutex<Attempt>,
}

impl PendingCall {
    fn new() -> Self {
        Self {
            attempt: Mutex::new(Attempt {
                state: AttemptState::Idle,
                handle: None,
                timer: None,
            }),
        }
    }

    /// Enter `Calling`; fails if the attempt was abandoned first.
    fn begin(&self, resumer: Resumer) -> bool {
        let mut attempt = self.attempt.lock();
        if matches!(attempt.state, AttemptState::Idle) {
            attempt.state = AttemptState::Calling(resumer);
            true
        } else {
            false
        }
    }

    fn is_calling(&self) -> bool {
        matches!(self.attempt.lock().state, AttemptState::Calling(_))
    }

    fn attach_handle(&self, handle: CallHandle) {
        let abandoned = {
            let mut attempt = self.attempt.lock();
            match attempt.state {
                AttemptState::Calling(_) => {
                    attempt.handle = Some(handle);
                    return;
                }
                AttemptState::Abandoned => Some(handle),
                _ => None,
            }
        };
        if let Some(handle) = abandoned {
            handle.cancel();
        }
    }

    fn attach_timer(&self, timer: TimerHandle) {
        {
            let mut attempt = self.attempt.lock();
            if matches!(attempt.state, AttemptState::Calling(_)) {
                attempt.timer = Some(timer);
                return;
            }
        }
        timer.cancel();
    }

    /// Leave `Calling` for `outcome`, returning the resumer to the winner.
    ///
    /// A timed-out attempt also cancels the call still in flight.
    fn settle(&self, outcome: AttemptState) -> Option<Resumer> {
        let timed_out = matches!(outcome, AttemptState::TimedOut);
        let (resumer, handle, timer) = {
            let mut attempt = self.attempt.lock();
            if !matches!(attempt.state, AttemptState::Calling(_)) {
                return None;
            }
            let AttemptState::Calling(resumer) = std::mem::replace(&mut attempt.state, outcome)
            else {
                return None;
            };
            (resumer, attempt.handle.take(), attempt.timer.take())
        };
        if let Some(timer) = timer {
            timer.cancel();
        }
        if let Some(handle) = handle.filter(|_| timed_out) {
            handle.cancel();
        }
        Some(resumer)
    }

    /// Cancel hook: give up on the attempt and release what it holds.
    fn abandon(&self) {
        let (handle, timer) = {
            let mut attempt = self.attempt.lock();
            if !matches!(attempt.state, AttemptState::Idle | AttemptState::Calling(_)) {
                return;
            }
            attempt.state = AttemptState::Abandoned;
            (attempt.handle.take(), attempt.timer.take())
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
        if let Some(timer) = timer {
            timer.cancel();
        }
    }

    fn state_name(&self) -> &'static str {
        self.attempt.lock().state.name()
    }
}

/// Step performing one asynchronous remote call with timeout and retry.
pub struct AsyncRequestStep {
    me: Weak<AsyncRequestStep>,
    params: RequestParams,
    factory: Arc<dyn CallFactory>,
    timeout: Duration,
    policy: RetryPolicy,
    next: Option<StepRef>,
}

impl AsyncRequestStep {
    /// Start building a request step for `params`.
    pub fn builder(params: RequestParams, factory: Arc<dyn CallFactory>) -> AsyncRequestStepBuilder {
        AsyncRequestStepBuilder::new(params, factory)
    }

    /// Parameters of the call this step performs.
    #[must_use]
    pub const fn params(&self) -> &RequestParams {
        &self.params
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn start_call(self: Arc<Self>, resumer: Resumer) {
        let engine = resumer.engine().clone();
        let pending = Arc::new(PendingCall::new());

        let on_cancel = Arc::clone(&pending);
        resumer.on_cancel(move || on_cancel.abandon());
        if !pending.begin(resumer) {
            debug!(call = %self.params, "Fiber cancelled before the call was issued");
            return;
        }

        let completion = {
            let step = Arc::clone(&self);
            let pending = Arc::clone(&pending);
            CallCompletion::new(move |response| step.complete(&pending, response))
        };
        let handle = self.factory.issue(&self.params, completion, self.timeout);
        pending.attach_handle(handle);

        if !pending.is_calling() {
            return;
        }
        let timer = {
            let step = Arc::clone(&self);
            let pending = Arc::clone(&pending);
            engine.schedule(self.timeout, move || step.expire(&pending))
        };
        pending.attach_timer(timer);
    }

    fn complete(self: Arc<Self>, pending: &PendingCall, response: CallResponse) {
        let outcome = if response.is_success() {
            AttemptState::Succeeded
        } else {
            AttemptState::Failed
        };
        match pending.settle(outcome) {
            Some(resumer) => resumer.resume_with(move |packet| self.on_response(packet, response)),
            None => debug!(
                call = %self.params,
                state = pending.state_name(),
                status = response.status_code(),
                "Dropping late call response"
            ),
        }
    }

    fn expire(self: Arc<Self>, pending: &PendingCall) {
        match pending.settle(AttemptState::TimedOut) {
            Some(resumer) => {
                warn!(call = %self.params, timeout_ms = self.timeout.as_millis(), "Call timed out");
                let response = CallResponse::timed_out(self.timeout);
                resumer.resume_with(move |packet| self.on_response(packet, response));
            }
            None => debug!(
                call = %self.params,
                state = pending.state_name(),
                "Dropping expired call timer"
            ),
        }
    }

    /// Decide how the fiber continues once an attempt settled.
    fn on_response(&self, packet: &mut Packet, response: CallResponse) -> NextAction {
        let attempts = packet
            .component::<RetryState>(RETRY_COMPONENT_NAME)
            .map_or(0, |state| state.attempts);
        if self.policy.should_retry(&response, attempts) {
            let attempt = attempts.saturating_add(1);
            let delay = self.policy.delay_for(attempt);
            warn!(
                call = %self.params,
                status = response.status_code(),
                attempt,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis(),
                "Call failed, retrying"
            );
            packet.put_component(RETRY_COMPONENT_NAME, RetryState { attempts: attempt });
            return match self.me.upgrade() {
                Some(me) => NextAction::retry_after(delay, me),
                None => NextAction::Terminate(FiberError::contract_violation(
                    "request step dropped while its fiber was retrying",
                )),
            };
        }

        match self.policy.classify(&response) {
            ResponseClass::Success => debug!(
                call = %self.params,
                status = response.status_code(),
                retries = attempts,
                "Call succeeded"
            ),
            ResponseClass::Retryable | ResponseClass::Terminal => warn!(
                call = %self.params,
                status = response.status_code(),
                retries = attempts,
                error = ?response.failure(),
                "Call failed, giving up"
            ),
        }
        packet.remove_component(RETRY_COMPONENT_NAME);
        packet.put_component(RESPONSE_COMPONENT_NAME, response);
        NextAction::proceed(self.next.as_ref())
    }
}

impl Step for AsyncRequestStep {
    fn name(&self) -> &str {
        &self.params.method
    }

    fn next(&self) -> Option<&StepRef> {
        self.next.as_ref()
    }

    fn apply(&self, packet: &mut Packet) -> NextAction {
        let Some(me) = self.me.upgrade() else {
            return NextAction::Terminate(FiberError::contract_violation(
                "request step dropped while in use",
            ));
        };
        let attempts = packet
            .component::<RetryState>(RETRY_COMPONENT_NAME)
            .map_or(0, |state| state.attempts);
        info!(call = %self.params, attempt = attempts.saturating_add(1), "Issuing call");

        NextAction::suspend(move |resumer| me.start_call(resumer))
    }
}

impl fmt::Debug for AsyncRequestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRequestStep")
            .field("params", &self.params)
            .field("timeout", &self.timeout)
            .field("policy", &self.policy)
            .field("next", &self.next.as_ref().map(|s| s.name().to_string()))
            .finish_non_exhaustive()
    }
}

/// Builder for [`AsyncRequestStep`].
pub struct AsyncRequestStepBuilder {
    params: RequestParams,
    factory: Arc<dyn CallFactory>,
    timeout: Duration,
    policy: RetryPolicy,
    next: Option<StepRef>,
}

impl AsyncRequestStepBuilder {
    fn new(params: RequestParams, factory: Arc<dyn CallFactory>) -> Self {
        let settings = CallSettings::default();
        Self {
            params,
            factory,
            timeout: settings.timeout(),
            policy: RetryPolicy::from(&settings),
            next: None,
        }
    }

    /// Take timeout and retry policy from configuration.
    #[must_use]
    pub fn settings(mut self, settings: &CallSettings) -> Self {
        self.timeout = settings.timeout();
        self.policy = RetryPolicy::from(settings);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Step that receives the response.
    #[must_use]
    pub fn next(mut self, next: impl Into<Option<StepRef>>) -> Self {
        self.next = next.into();
        self
    }

    #[must_use]
    pub fn build(self) -> StepRef {
        let Self {
            params,
            factory,
            timeout,
            policy,
            next,
        } = self;
        Arc::new_cyclic(|me: &Weak<AsyncRequestStep>| AsyncRequestStep {
            me: me.clone(),
            params,
            factory,
            timeout,
            policy,
            next,
        })
    }
}

impl fmt::Debug for AsyncRequestStepBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRequestStepBuilder")
            .field("params", &self.params)
            .field("timeout", &self.timeout)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::response::{CallFailure, Headers};
    use crate::retry::Backoff;

    struct NeverCalled;

    impl CallFactory for NeverCalled {
        fn issue(&self, _: &RequestParams, _: CallCompletion, _: Duration) -> CallHandle {
            CallHandle::detached()
        }
    }

    fn step(max_retries: u32) -> Arc<AsyncRequestStep> {
        Arc::new_cyclic(|me: &Weak<AsyncRequestStep>| AsyncRequestStep {
            me: me.clone(),
            params: RequestParams::new("listPod").in_namespace("ns1"),
            factory: Arc::new(NeverCalled),
            timeout: Duration::from_secs(1),
            policy: RetryPolicy::new(max_retries, Backoff::Fixed(Duration::from_millis(3))),
            next: None,
        })
    }

    fn conflict() -> CallResponse {
        CallResponse::failed(CallFailure::api("conflict"), 409, Headers::new())
    }

    #[test]
    fn test_retryable_failure_increments_attempts() {
        let step = step(2);
        let mut packet = Packet::new();

        let action = step.on_response(&mut packet, conflict());

        assert!(matches!(
            action,
            NextAction::RetryAfter { delay, .. } if delay == Duration::from_millis(3)
        ));
        assert_eq!(
            packet.component::<RetryState>(RETRY_COMPONENT_NAME),
            Some(&RetryState { attempts: 1 })
        );
        assert!(response_from(&packet).is_none());
    }

    #[test]
    fn test_exhausted_retries_store_failure() {
        let step = step(2);
        let mut packet = Packet::new();
        packet.put_component(RETRY_COMPONENT_NAME, RetryState { attempts: 2 });

        let action = step.on_response(&mut packet, conflict());

        assert!(matches!(action, NextAction::Done));
        assert!(!packet.contains_component(RETRY_COMPONENT_NAME));
        assert_eq!(response_from(&packet).map(CallResponse::status_code), Some(409));
    }

    #[test]
    fn test_success_clears_retry_state() {
        let step = step(2);
        let mut packet = Packet::new();
        packet.put_component(RETRY_COMPONENT_NAME, RetryState { attempts: 1 });

        let response = CallResponse::success(serde_json::json!({"items": []}), 200, Headers::new());
        let action = step.on_response(&mut packet, response);

        assert!(matches!(action, NextAction::Done));
        assert!(!packet.contains_component(RETRY_COMPONENT_NAME));
        assert!(response_from(&packet).is_some_and(CallResponse::is_success));
    }

    #[test]
    fn test_builder_applies_settings() {
        let settings = CallSettings {
            timeout_ms: 250,
            max_retries: 9,
            ..CallSettings::default()
        };
        let built = AsyncRequestStep::builder(RequestParams::new("readPod"), Arc::new(NeverCalled))
            .settings(&settings)
            .max_retries(3)
            .build();

        assert_eq!(built.name(), "readPod");
        assert!(built.next().is_none());
    }

    #[test]
    fn test_abandon_before_begin_blocks_call() {
        let pending = PendingCall::new();
        pending.abandon();
        assert_eq!(pending.state_name(), "abandoned");
        assert!(!pending.is_calling());
    }
}
