//! Reference reconciliation run against canned responses.
//!
//! Drives `StepA → listPod in ns1 → StepB` through the engine with a
//! [`CannedCallFactory`] scripted to answer the first `conflicts` attempts
//! with 409 and then list `items` pods.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use operator_calls::{
    AsyncRequestStep, CannedCallFactory, RequestParams, ResponseStep, RetryPolicy, response_from,
};
use operator_core::CallSettings;
use operator_work::{ChainBuilder, Engine, FiberOutcome, FiberStatus, NextAction, Packet, StepRef};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

const LIST_METHOD: &str = "listPod";
const NAMESPACE: &str = "ns1";
const CONFLICT: u16 = 409;

/// Parameters of one simulated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationOptions {
    /// Leading attempts answered with 409.
    pub conflicts: usize,
    /// Pods returned once the conflicts are used up.
    pub items: usize,
    /// Overrides `calls.max_retries` from the configuration.
    pub max_retries: Option<u32>,
}

/// What the run ended with, printed as JSON by the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub fiber_id: String,
    /// `completed`, `failed` or `cancelled`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub retries: u32,
    pub last_step: Option<String>,
    pub response_status: Option<u16>,
    pub response_success: bool,
    pub items: Option<usize>,
    pub calls_issued: usize,
}

/// Run the reference chain once and wait for it to finish.
///
/// # Errors
///
/// Fails when the engine rejects the fiber or its outcome is lost.
pub async fn run(
    engine: &Engine,
    settings: &CallSettings,
    options: SimulationOptions,
) -> Result<SimulationReport> {
    let factory = Arc::new(script(options));
    let mut policy = RetryPolicy::from(settings);
    if let Some(max_retries) = options.max_retries {
        policy.max_retries = max_retries;
    }

    info!(
        conflicts = options.conflicts,
        items = options.items,
        max_retries = policy.max_retries,
        "Starting simulation"
    );

    let head = reference_chain(Arc::clone(&factory), settings, policy)?;
    let outcome = engine
        .submit(head, Packet::new())
        .context("engine rejected the simulation fiber")?
        .join()
        .await
        .context("simulation fiber did not report an outcome")?;

    Ok(report(&outcome, factory.calls().len()))
}

fn script(options: SimulationOptions) -> CannedCallFactory {
    let factory = CannedCallFactory::new();
    if options.conflicts > 0 {
        factory
            .expect(LIST_METHOD)
            .with_namespace(NAMESPACE)
            .times(options.conflicts)
            .failing_with(CONFLICT);
    }
    let pods: Vec<Value> = (0..options.items)
        .map(|i| json!({ "name": format!("pod-{i}") }))
        .collect();
    factory
        .expect(LIST_METHOD)
        .with_namespace(NAMESPACE)
        .returning(json!({ "items": pods }));
    factory
}

fn reference_chain(
    factory: Arc<CannedCallFactory>,
    settings: &CallSettings,
    policy: RetryPolicy,
) -> Result<StepRef> {
    let timeout = Duration::from_millis(settings.timeout_ms);
    ChainBuilder::new()
        .then_fn("StepA", |packet, next| {
            packet.put("x", 1_i32);
            NextAction::proceed(next)
        })
        .then(move |next| {
            let params = RequestParams::new(LIST_METHOD).in_namespace(NAMESPACE);
            AsyncRequestStep::builder(params, factory)
                .timeout(timeout)
                .retry_policy(policy)
                .next(next)
                .build()
        })
        .then(|next| {
            ResponseStep::builder("StepB")
                .on_success(|packet, response, next| {
                    let items = response
                        .result()
                        .and_then(|v| v["items"].as_array())
                        .map(Vec::len);
                    packet.put("items", items);
                    NextAction::proceed(next)
                })
                .on_failure(|_, _, next| NextAction::proceed(next))
                .next(next)
                .build()
        })
        .build()
        .ok_or_else(|| anyhow!("reference chain is empty"))
}

fn report(outcome: &FiberOutcome, calls_issued: usize) -> SimulationReport {
    let response = response_from(&outcome.packet);
    let (status, failure) = match &outcome.status {
        FiberStatus::Completed => ("completed", None),
        FiberStatus::Failed(cause) => ("failed", Some(cause.to_string())),
        FiberStatus::Cancelled => ("cancelled", None),
    };

    SimulationReport {
        fiber_id: outcome.fiber_id.to_string(),
        status: status.to_string(),
        failure,
        retries: outcome.retries,
        last_step: outcome.last_step.clone(),
        response_status: response.map(|r| r.status_code()),
        response_success: response.is_some_and(|r| r.is_success()),
        items: outcome.packet.get::<Option<usize>>("items").copied().flatten(),
        calls_issued,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use operator_core::{BackoffSettings, EngineSettings};

    fn fast_settings(max_retries: u32) -> CallSettings {
        CallSettings {
            max_retries,
            backoff: BackoffSettings::Fixed { delay_ms: 1 },
            ..CallSettings::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_conflicts_then_items() {
        let engine = Engine::current(EngineSettings::default()).unwrap();
        let options = SimulationOptions {
            conflicts: 2,
            items: 3,
            max_retries: None,
        };

        let report = run(&engine, &fast_settings(5), options).await.unwrap();

        assert_eq!(report.status, "completed");
        assert_eq!(report.retries, 2);
        assert_eq!(report.response_status, Some(200));
        assert!(report.response_success);
        assert_eq!(report.items, Some(3));
        assert_eq!(report.calls_issued, 3);
        assert_eq!(report.last_step.as_deref(), Some("StepB"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_override_exhausts_retries() {
        let engine = Engine::current(EngineSettings::default()).unwrap();
        let options = SimulationOptions {
            conflicts: 3,
            items: 3,
            max_retries: Some(2),
        };

        let report = run(&engine, &fast_settings(10), options).await.unwrap();

        assert_eq!(report.status, "completed");
        assert_eq!(report.retries, 2);
        assert_eq!(report.response_status, Some(409));
        assert!(!report.response_success);
        assert_eq!(report.items, None);
        assert_eq!(report.calls_issued, 3);
    }
}
