//! Step that routes on the response left by the preceding request step.

use std::fmt;
use std::sync::Arc;

use operator_work::{FiberError, NextAction, Packet, Step, StepRef};
use tracing::debug;

use crate::request_step::RESPONSE_COMPONENT_NAME;
use crate::response::CallResponse;

type Handler = Box<dyn Fn(&mut Packet, &CallResponse, Option<&StepRef>) -> NextAction + Send + Sync>;

/// Pairs a request step with success and failure handling.
///
/// Without handlers a success proceeds to `next` and a failure terminates
/// the fiber naming this step. A missing response is a contract violation.
pub struct ResponseStep {
    name: String,
    next: Option<StepRef>,
    on_success: Handler,
    on_failure: Handler,
}

impl ResponseStep {
    pub fn builder(name: impl Into<String>) -> ResponseStepBuilder {
        ResponseStepBuilder::new(name.into())
    }
}

impl Step for ResponseStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn next(&self) -> Option<&StepRef> {
        self.next.as_ref()
    }

    fn apply(&self, packet: &mut Packet) -> NextAction {
        // Taken out for the handler call so it can borrow the packet mutably.
        let Some(response) = packet.take_component::<CallResponse>(RESPONSE_COMPONENT_NAME) else {
            return NextAction::Terminate(FiberError::contract_violation(format!(
                "step '{}' found no call response",
                self.name
            )));
        };

        debug!(
            step = %self.name,
            status = response.status_code(),
            success = response.is_success(),
            "Routing call response"
        );
        let action = if response.is_success() {
            (self.on_success)(packet, &response, self.next.as_ref())
        } else {
            (self.on_failure)(packet, &response, self.next.as_ref())
        };
        packet.put_component(RESPONSE_COMPONENT_NAME, response);
        action
    }
}

impl fmt::Debug for ResponseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStep")
            .field("name", &self.name)
            .field("next", &self.next.as_ref().map(|s| s.name().to_string()))
            .finish_non_exhaustive()
    }
}

/// Builder for [`ResponseStep`].
pub struct ResponseStepBuilder {
    name: String,
    next: Option<StepRef>,
    on_success: Option<Handler>,
    on_failure: Option<Handler>,
}

impl ResponseStepBuilder {
    const fn new(name: String) -> Self {
        Self {
            name,
            next: None,
            on_success: None,
            on_failure: None,
        }
    }

    #[must_use]
    pub fn on_success<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut Packet, &CallResponse, Option<&StepRef>) -> NextAction + Send + Sync + 'static,
    {
        self.on_success = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_failure<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut Packet, &CallResponse, Option<&StepRef>) -> NextAction + Send + Sync + 'static,
    {
        self.on_failure = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn next(mut self, next: impl Into<Option<StepRef>>) -> Self {
        self.next = next.into();
        self
    }

    #[must_use]
    pub fn build(self) -> StepRef {
        let step_name = self.name.clone();
        let on_failure = self.on_failure.unwrap_or_else(|| {
            Box::new(move |_: &mut Packet, response: &CallResponse, _: Option<&StepRef>| {
                let reason = response.failure().map_or_else(
                    || format!("call failed with status {}", response.status_code()),
                    ToString::to_string,
                );
                NextAction::fail(step_name.clone(), reason)
            })
        });
        let on_success = self
            .on_success
            .unwrap_or_else(|| {
                Box::new(|_: &mut Packet, _: &CallResponse, next: Option<&StepRef>| {
                    NextAction::proceed(next)
                })
            });

        Arc::new(ResponseStep {
            name: self.name,
            next: self.next,
            on_success,
            on_failure,
        })
    }
}

impl fmt::Debug for ResponseStepBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStepBuilder")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{CallFailure, Headers};
    use operator_work::FnStep;
    use serde_json::json;

    fn packet_with(response: CallResponse) -> Packet {
        let mut packet = Packet::new();
        packet.put_component(RESPONSE_COMPONENT_NAME, response);
        packet
    }

    #[test]
    fn test_success_proceeds_by_default() {
        let after = FnStep::new("after", None, |_: &mut Packet, next: Option<&StepRef>| {
            NextAction::proceed(next)
        })
        .into_ref();
        let step = ResponseStep::builder("onList").next(after).build();
        let mut packet = packet_with(CallResponse::success(json!({}), 200, Headers::new()));

        let action = step.apply(&mut packet);

        assert!(matches!(action, NextAction::Invoke(ref s) if s.name() == "after"));
        assert!(packet.contains_component(RESPONSE_COMPONENT_NAME));
    }

    #[test]
    fn test_failure_terminates_by_default() {
        let step = ResponseStep::builder("onList").build();
        let mut packet =
            packet_with(CallResponse::failed(CallFailure::api("gone"), 410, Headers::new()));

        let action = step.apply(&mut packet);

        assert!(matches!(
            action,
            NextAction::Terminate(FiberError::StepFailed { ref step, .. }) if step == "onList"
        ));
    }

    #[test]
    fn test_handlers_see_response_and_packet() {
        let step = ResponseStep::builder("onList")
            .on_success(|packet, response, next| {
                let count = response
                    .result()
                    .and_then(|v| v["items"].as_array())
                    .map_or(0, Vec::len);
                packet.put("count", count);
                NextAction::proceed(next)
            })
            .on_failure(|packet, response, next| {
                packet.put("status", response.status_code());
                NextAction::proceed(next)
            })
            .build();

        let mut listed = packet_with(CallResponse::success(
            json!({"items": [1, 2]}),
            200,
            Headers::new(),
        ));
        assert!(matches!(step.apply(&mut listed), NextAction::Done));
        assert_eq!(listed.get::<usize>("count"), Some(&2));

        let mut missing =
            packet_with(CallResponse::failed(CallFailure::api("not found"), 404, Headers::new()));
        assert!(matches!(step.apply(&mut missing), NextAction::Done));
        assert_eq!(missing.get::<u16>("status"), Some(&404));
    }

    #[test]
    fn test_missing_response_is_contract_violation() {
        let step = ResponseStep::builder("onList").build();
        let action = step.apply(&mut Packet::new());
        assert!(matches!(
            action,
            NextAction::Terminate(FiberError::ContractViolation { .. })
        ));
    }
}
