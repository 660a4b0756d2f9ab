//! End-to-end tests of request steps running on the fiber engine.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::arithmetic_side_effects)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use operator_calls::{
    AsyncRequestStep, Backoff, CallCompletion, CallFactory, CallHandle, CallResponse,
    CannedCallFactory, FailureKind, Headers, NO_STATUS, RETRY_COMPONENT_NAME, RequestParams,
    RetryPolicy, response_from,
};
use operator_core::EngineSettings;
use operator_work::{ChainBuilder, Engine, FiberOutcome, FiberState, NextAction, Packet, StepRef};
use serde_json::json;

fn engine() -> Engine {
    Engine::current(EngineSettings::default()).expect("tokio runtime")
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, Backoff::Fixed(Duration::from_millis(1)))
}

/// StepA → listPod in `ns1` → StepB, where StepB records what it saw.
fn list_pods_chain(
    factory: Arc<dyn CallFactory>,
    policy: RetryPolicy,
    timeout: Duration,
    visits: Arc<AtomicUsize>,
) -> StepRef {
    ChainBuilder::new()
        .then_fn("StepA", |packet, next| {
            packet.put("x", 1_i32);
            NextAction::proceed(next)
        })
        .then(move |next| {
            AsyncRequestStep::builder(RequestParams::new("listPod").in_namespace("ns1"), factory)
                .retry_policy(policy)
                .timeout(timeout)
                .next(next)
                .build()
        })
        .then_fn("StepB", move |packet, next| {
            visits.fetch_add(1, Ordering::SeqCst);
            let (status, success, items) = response_from(packet).map_or((None, false, None), |r| {
                let items = r
                    .result()
                    .and_then(|v| v["items"].as_array())
                    .map(Vec::len);
                (Some(r.status_code()), r.is_success(), items)
            });
            packet.put("status", status);
            packet.put("success", success);
            packet.put("items", items);
            NextAction::proceed(next)
        })
        .build()
        .unwrap()
}

async fn run(engine: &Engine, head: StepRef) -> FiberOutcome {
    engine.submit(head, Packet::new()).unwrap().join().await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_conflicts_then_success() {
    let engine = engine();
    let factory = Arc::new(CannedCallFactory::new());
    factory
        .expect("listPod")
        .with_namespace("ns1")
        .times(2)
        .failing_with(409);
    factory
        .expect("listPod")
        .with_namespace("ns1")
        .returning(json!({"items": [{"name": "p1"}, {"name": "p2"}, {"name": "p3"}]}));

    let visits = Arc::new(AtomicUsize::new(0));
    let head = list_pods_chain(
        factory.clone(),
        fast_policy(5),
        Duration::from_secs(5),
        Arc::clone(&visits),
    );
    let outcome = run(&engine, head).await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.retries, 2);
    assert_eq!(outcome.packet.get::<i32>("x"), Some(&1));
    assert_eq!(outcome.packet.get::<bool>("success"), Some(&true));
    assert_eq!(outcome.packet.get::<Option<usize>>("items"), Some(&Some(3)));
    assert!(!outcome.packet.contains_component(RETRY_COMPONENT_NAME));
    assert_eq!(visits.load(Ordering::SeqCst), 1);
    assert_eq!(factory.calls().len(), 3);
    assert!(factory.verify_all_invoked().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conflicts_exhaust_retries() {
    let engine = engine();
    let factory = Arc::new(CannedCallFactory::new());
    factory
        .expect("listPod")
        .with_namespace("ns1")
        .times(3)
        .failing_with(409);

    let visits = Arc::new(AtomicUsize::new(0));
    let head = list_pods_chain(
        factory.clone(),
        fast_policy(2),
        Duration::from_secs(5),
        Arc::clone(&visits),
    );
    let outcome = run(&engine, head).await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.retries, 2);
    assert_eq!(outcome.packet.get::<bool>("success"), Some(&false));
    assert_eq!(outcome.packet.get::<Option<u16>>("status"), Some(&Some(409)));
    assert_eq!(outcome.last_step.as_deref(), Some("StepB"));
    assert_eq!(visits.load(Ordering::SeqCst), 1);
    assert!(factory.verify_all_invoked().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_count_matches_budget() {
    for max_retries in [0_u32, 1, 4] {
        let engine = engine();
        let factory = Arc::new(CannedCallFactory::new());
        factory
            .expect("listPod")
            .times(usize::try_from(max_retries).unwrap() + 1)
            .failing_with(503);

        let head = list_pods_chain(
            factory.clone(),
            fast_policy(max_retries),
            Duration::from_secs(5),
            Arc::new(AtomicUsize::new(0)),
        );
        let outcome = run(&engine, head).await;

        assert_eq!(outcome.retries, max_retries, "max_retries {max_retries}");
        assert_eq!(
            factory.calls().len(),
            usize::try_from(max_retries).unwrap() + 1
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_not_found_is_not_retried() {
    let engine = engine();
    let factory = Arc::new(CannedCallFactory::new());

    let head = list_pods_chain(
        factory.clone(),
        fast_policy(5),
        Duration::from_secs(5),
        Arc::new(AtomicUsize::new(0)),
    );
    let outcome = run(&engine, head).await;

    assert_eq!(outcome.retries, 0);
    assert_eq!(outcome.packet.get::<Option<u16>>("status"), Some(&Some(404)));
    assert_eq!(factory.unmatched_calls().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_silent_call_times_out() {
    let engine = engine();
    let factory = Arc::new(CannedCallFactory::new());
    factory.expect("listPod").never_completing();

    let visits = Arc::new(AtomicUsize::new(0));
    let head = list_pods_chain(
        factory.clone(),
        fast_policy(0),
        Duration::from_millis(20),
        Arc::clone(&visits),
    );
    let outcome = run(&engine, head).await;

    assert!(outcome.is_completed());
    let response = response_from(&outcome.packet).unwrap();
    assert_eq!(response.status_code(), NO_STATUS);
    assert_eq!(response.failure().map(|f| f.kind), Some(FailureKind::Timeout));
    assert_eq!(visits.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timed_out_call_is_cancelled() {
    let engine = engine();
    let factory = Arc::new(CannedCallFactory::new());
    factory.expect("listPod").times(3).never_completing();

    let head = list_pods_chain(
        factory.clone(),
        fast_policy(2),
        Duration::from_millis(20),
        Arc::new(AtomicUsize::new(0)),
    );
    let outcome = run(&engine, head).await;

    assert_eq!(outcome.retries, 2);
    let response = response_from(&outcome.packet).unwrap();
    assert_eq!(response.failure().map(|f| f.kind), Some(FailureKind::Timeout));
    assert_eq!(factory.calls().len(), 3);
    assert_eq!(factory.cancelled_calls(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_answered_call_is_not_cancelled() {
    let engine = engine();
    let factory = Arc::new(CannedCallFactory::new().with_delay(Duration::from_millis(5)));
    factory.expect("listPod").returning(json!({"items": []}));

    let head = list_pods_chain(
        factory.clone(),
        fast_policy(0),
        Duration::from_secs(5),
        Arc::new(AtomicUsize::new(0)),
    );
    let outcome = run(&engine, head).await;

    assert_eq!(outcome.packet.get::<bool>("success"), Some(&true));
    assert_eq!(factory.cancelled_calls(), 0);
}

/// Completes every call right around its timeout.
struct RacingFactory {
    completions: Arc<AtomicUsize>,
}

impl CallFactory for RacingFactory {
    fn issue(
        &self,
        _params: &RequestParams,
        completion: CallCompletion,
        timeout: Duration,
    ) -> CallHandle {
        let completions = Arc::clone(&self.completions);
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            completions.fetch_add(1, Ordering::SeqCst);
            completion.complete(CallResponse::success(
                json!({"items": []}),
                200,
                Headers::new(),
            ));
        });
        CallHandle::new(move || task.abort())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_and_response_race_resumes_once() {
    let engine = engine();
    let completions = Arc::new(AtomicUsize::new(0));
    let factory: Arc<dyn CallFactory> = Arc::new(RacingFactory {
        completions: Arc::clone(&completions),
    });
    let visits = Arc::new(AtomicUsize::new(0));

    let fibers = 50;
    let handles: Vec<_> = (0..fibers)
        .map(|_| {
            let head = list_pods_chain(
                Arc::clone(&factory),
                fast_policy(0),
                Duration::from_millis(10),
                Arc::clone(&visits),
            );
            engine.submit(head, Packet::new()).unwrap()
        })
        .collect();

    for handle in handles {
        let outcome = handle.join().await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(outcome.last_step.as_deref(), Some("StepB"));
    }

    assert_eq!(visits.load(Ordering::SeqCst), fibers);
    assert_eq!(engine.live_fibers(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_abandons_outstanding_call() {
    let engine = engine();
    let factory = Arc::new(CannedCallFactory::new());
    factory.expect("listPod").never_completing();

    let visits = Arc::new(AtomicUsize::new(0));
    let head = list_pods_chain(
        factory.clone(),
        fast_policy(5),
        Duration::from_secs(30),
        Arc::clone(&visits),
    );
    let handle = engine.submit(head, Packet::new()).unwrap();

    for _ in 0..200 {
        if handle.state() == Some(FiberState::Suspended) && !factory.calls().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle.join())
        .await
        .expect("cancellation should not wait for the call timeout")
        .unwrap();
    assert!(outcome.is_cancelled());
    assert_eq!(outcome.last_step.as_deref(), Some("listPod"));
    assert_eq!(factory.cancelled_calls(), 1);
    assert_eq!(visits.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delayed_factory_completes_off_worker() {
    let engine = engine();
    let factory = Arc::new(CannedCallFactory::new().with_delay(Duration::from_millis(5)));
    factory.expect("listPod").failing_with(500);
    factory.expect("listPod").returning(json!({"items": [1]}));

    let head = list_pods_chain(
        factory.clone(),
        fast_policy(3),
        Duration::from_secs(5),
        Arc::new(AtomicUsize::new(0)),
    );
    let outcome = run(&engine, head).await;

    assert_eq!(outcome.retries, 1);
    assert_eq!(outcome.packet.get::<Option<usize>>("items"), Some(&Some(1)));
    assert!(factory.verify_all_invoked().is_ok());
}
