//! Cooperative fiber scheduler.
//!
//! The engine multiplexes fibers onto the worker threads of a tokio runtime.
//! A fiber runs its chain synchronously on one worker until a step yields
//! (`Suspend`, `RetryAfter`, `Done`, `Terminate`), then the worker is
//! released. Resumptions and retry timers re-dispatch the fiber, possibly on
//! a different worker.
//!
//! The engine owns every fiber in a table keyed by [`FiberId`]; parent/child
//! links are identifiers, never references. While a fiber is parked its
//! packet lives in the table; while it runs the packet is moved into the
//! worker task, so only one party can touch it at a time.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use operator_core::EngineSettings;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action::{NextAction, Suspension};
use crate::error::{EngineError, FiberError, Result};
use crate::fiber::{
    CHILD_OUTCOMES_COMPONENT_NAME, FiberHandle, FiberId, FiberOutcome, FiberState, FiberStatus,
};
use crate::packet::Packet;
use crate::step::StepRef;

/// How long a drain waits for force-cancelled fibers to wind down.
const FORCE_CANCEL_WAIT: Duration = Duration::from_secs(5);

type CancelHook = Box<dyn FnOnce() + Send>;
type ResumeFn = Box<dyn FnOnce(&mut Packet) -> NextAction + Send>;

/// Where a dispatched fiber picks up.
enum Entry {
    /// Enter the given step.
    Step(StepRef),
    /// Re-enter the fiber's cursor.
    Resume,
    /// Run a closure on the packet and interpret its verdict.
    With(ResumeFn),
    /// Deliver child outcomes, then re-enter the cursor (the join step).
    Join(Vec<FiberOutcome>),
}

struct FiberRecord {
    state: FiberState,
    parent: Option<FiberId>,
    awaiting: HashSet<FiberId>,
    child_outcomes: Vec<FiberOutcome>,
    cursor: Option<StepRef>,
    packet: Option<Packet>,
    cancelled: Arc<AtomicBool>,
    epoch: u64,
    cancel_hooks: Vec<CancelHook>,
    last_step: Option<String>,
    retries: u32,
    completion: Option<oneshot::Sender<FiberOutcome>>,
}

impl FiberRecord {
    fn new(
        cursor: StepRef,
        packet: Packet,
        parent: Option<FiberId>,
        completion: Option<oneshot::Sender<FiberOutcome>>,
    ) -> Self {
        Self {
            state: FiberState::Ready,
            parent,
            awaiting: HashSet::new(),
            child_outcomes: Vec::new(),
            cursor: Some(cursor),
            packet: Some(packet),
            cancelled: Arc::new(AtomicBool::new(false)),
            epoch: 0,
            cancel_hooks: Vec::new(),
            last_step: None,
            retries: 0,
            completion,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Work collected under the table lock and carried out after releasing it.
#[derive(Default)]
struct Effects {
    hooks: Vec<CancelHook>,
    dispatches: Vec<(FiberId, FiberState, u64, Entry)>,
    completions: Vec<(oneshot::Sender<FiberOutcome>, FiberOutcome)>,
    idle: bool,
}

#[derive(Default)]
struct FiberTable {
    fibers: HashMap<FiberId, FiberRecord>,
}

impl FiberTable {
    /// Remove a fiber and route its outcome to its parent or its handle.
    fn finish(&mut self, id: FiberId, status: FiberStatus, packet: Packet, effects: &mut Effects) {
        let Some(record) = self.fibers.remove(&id) else {
            return;
        };

        match &status {
            FiberStatus::Completed => {
                info!(fiber_id = %id, last_step = ?record.last_step, retries = record.retries, "Fiber completed");
            }
            FiberStatus::Failed(cause) => {
                warn!(fiber_id = %id, last_step = ?record.last_step, error = %cause, "Fiber failed");
            }
            FiberStatus::Cancelled => {
                info!(fiber_id = %id, last_step = ?record.last_step, "Fiber cancelled");
            }
        }

        let outcome = FiberOutcome {
            fiber_id: id,
            status,
            packet,
            last_step: record.last_step,
            retries: record.retries,
        };

        if let Some(parent_id) = record.parent {
            self.child_finished(parent_id, outcome, effects);
        } else if let Some(sender) = record.completion {
            effects.completions.push((sender, outcome));
        }

        if self.fibers.is_empty() {
            effects.idle = true;
        }
    }

    fn child_finished(&mut self, parent_id: FiberId, outcome: FiberOutcome, effects: &mut Effects) {
        let Some(parent) = self.fibers.get_mut(&parent_id) else {
            debug!(fiber_id = %outcome.fiber_id, parent_id = %parent_id, "Parent already finished, dropping child outcome");
            return;
        };

        parent.awaiting.remove(&outcome.fiber_id);
        parent.child_outcomes.push(outcome);
        if !parent.awaiting.is_empty() || parent.state != FiberState::AwaitingChildren {
            return;
        }

        let outcomes = std::mem::take(&mut parent.child_outcomes);
        if parent.is_cancelled() {
            let mut packet = parent.packet.take().unwrap_or_default();
            packet.put_component(CHILD_OUTCOMES_COMPONENT_NAME, outcomes);
            self.finish(parent_id, FiberStatus::Cancelled, packet, effects);
        } else {
            effects.dispatches.push((
                parent_id,
                FiberState::AwaitingChildren,
                parent.epoch,
                Entry::Join(outcomes),
            ));
        }
    }

    /// Mark a fiber and its live descendants cancelled.
    ///
    /// Parked fibers finish immediately; a running fiber finishes at its next
    /// loop iteration; a parent awaiting children finishes once the last of
    /// them reports.
    fn cancel(&mut self, id: FiberId, effects: &mut Effects) {
        let Some(record) = self.fibers.get_mut(&id) else {
            return;
        };
        if record.is_cancelled() {
            return;
        }

        record.cancelled.store(true, Ordering::Release);
        effects.hooks.append(&mut record.cancel_hooks);
        let children: Vec<FiberId> = record.awaiting.iter().copied().collect();
        debug!(fiber_id = %id, state = %record.state, children = children.len(), "Cancelling fiber");

        for child in children {
            self.cancel(child, effects);
        }

        // Cancelling the children may already have finished this fiber.
        let Some(record) = self.fibers.get_mut(&id) else {
            return;
        };
        let state = record.state;
        match state {
            FiberState::Ready | FiberState::Suspended | FiberState::RetryWait => {
                let packet = record.packet.take().unwrap_or_default();
                self.finish(id, FiberStatus::Cancelled, packet, effects);
            }
            FiberState::AwaitingChildren if record.awaiting.is_empty() => {
                let mut packet = record.packet.take().unwrap_or_default();
                packet.put_component(
                    CHILD_OUTCOMES_COMPONENT_NAME,
                    std::mem::take(&mut record.child_outcomes),
                );
                self.finish(id, FiberStatus::Cancelled, packet, effects);
            }
            _ => {}
        }
    }
}

struct EngineInner {
    settings: EngineSettings,
    runtime: Handle,
    table: Mutex<FiberTable>,
    accepting: AtomicBool,
    idle: Notify,
}

/// Summary of a drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Fibers alive when the drain started.
    pub live_at_start: usize,
    /// Root fibers cancelled after the grace period.
    pub force_cancelled: usize,
    /// Fibers still alive when the drain returned.
    pub remaining: usize,
}

/// Handle to a pending engine timer.
#[derive(Debug)]
pub struct TimerHandle {
    handle: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancel the timer; a no-op once it fired.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the timer fired or was cancelled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Fiber scheduler.
///
/// Cheap to clone; every clone drives the same fiber table. Create one per
/// process at startup and pass it explicitly to whatever submits chains.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine running fibers on the given runtime.
    #[must_use]
    pub fn new(settings: EngineSettings, runtime: Handle) -> Self {
        info!(
            worker_threads = settings.worker_threads,
            drain_grace_ms = settings.drain_grace_ms,
            "Starting fiber engine"
        );
        Self {
            inner: Arc::new(EngineInner {
                settings,
                runtime,
                table: Mutex::new(FiberTable::default()),
                accepting: AtomicBool::new(true),
                idle: Notify::new(),
            }),
        }
    }

    /// Create an engine on the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NoRuntime` outside a tokio runtime.
    pub fn current(settings: EngineSettings) -> Result<Self> {
        Handle::try_current()
            .map(|runtime| Self::new(settings, runtime))
            .map_err(|e| EngineError::NoRuntime {
                reason: e.to_string(),
            })
    }

    /// Engine settings.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Whether new fibers are accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Number of fibers that have not reached a terminal state.
    #[must_use]
    pub fn live_fibers(&self) -> usize {
        self.inner.table.lock().fibers.len()
    }

    /// Scheduling state of a live fiber; `None` once it is terminal.
    #[must_use]
    pub fn state(&self, id: FiberId) -> Option<FiberState> {
        self.inner.table.lock().fibers.get(&id).map(|r| r.state)
    }

    /// Submit a chain as a root fiber.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ShuttingDown` once a drain has started.
    pub fn submit(&self, head: StepRef, packet: Packet) -> Result<FiberHandle> {
        if !self.is_accepting() {
            warn!(step = head.name(), "Rejecting fiber, engine is draining");
            return Err(EngineError::ShuttingDown);
        }

        let id = FiberId::new();
        let (sender, receiver) = oneshot::channel();
        info!(fiber_id = %id, step = head.name(), "Submitting fiber");

        self.inner
            .table
            .lock()
            .fibers
            .insert(id, FiberRecord::new(head.clone(), packet, None, Some(sender)));
        self.dispatch(id, FiberState::Ready, 0, Entry::Step(head));

        Ok(FiberHandle::new(id, self.clone(), receiver))
    }

    /// Cancel a fiber and all its live descendants.
    ///
    /// Registered cancel hooks (outstanding calls, pending timers) fire
    /// immediately. Unknown or finished fibers are ignored.
    pub fn cancel(&self, id: FiberId) {
        let mut effects = Effects::default();
        self.inner.table.lock().cancel(id, &mut effects);
        self.apply(effects);
    }

    /// Run `task` after `delay` on the engine's runtime.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        TimerHandle { handle }
    }

    /// Stop accepting fibers and wait for the live ones to finish.
    ///
    /// Root fibers still alive after `grace` are cancelled, which cancels
    /// their descendants as well.
    pub async fn drain(&self, grace: Duration) -> DrainReport {
        self.inner.accepting.store(false, Ordering::Release);

        let mut report = DrainReport {
            live_at_start: self.live_fibers(),
            ..DrainReport::default()
        };
        info!(live = report.live_at_start, grace = ?grace, "Draining engine");

        if tokio::time::timeout(grace, self.wait_idle()).await.is_err() {
            let roots = self.root_fibers();
            warn!(count = roots.len(), "Grace period elapsed, cancelling remaining fibers");
            report.force_cancelled = roots.len();
            for id in roots {
                self.cancel(id);
            }
            if tokio::time::timeout(FORCE_CANCEL_WAIT, self.wait_idle())
                .await
                .is_err()
            {
                warn!(live = self.live_fibers(), "Fibers still live after forced cancellation");
            }
        }

        report.remaining = self.live_fibers();
        info!(
            force_cancelled = report.force_cancelled,
            remaining = report.remaining,
            "Engine drained"
        );
        report
    }

    /// Drain using the configured grace period.
    pub async fn shutdown(&self) -> DrainReport {
        self.drain(self.inner.settings.drain_grace()).await
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.live_fibers() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn root_fibers(&self) -> Vec<FiberId> {
        self.inner
            .table
            .lock()
            .fibers
            .iter()
            .filter(|(_, record)| record.parent.is_none())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Claim a parked fiber and run it on a worker.
    ///
    /// The claim only succeeds if the fiber is still in `expected` state at
    /// `epoch`; stale timers and resumptions are dropped here.
    fn dispatch(&self, id: FiberId, expected: FiberState, epoch: u64, entry: Entry) {
        let claimed = {
            let mut table = self.inner.table.lock();
            match table.fibers.get_mut(&id) {
                Some(record)
                    if record.state == expected
                        && record.epoch == epoch
                        && !record.is_cancelled() =>
                {
                    match record.packet.take() {
                        Some(packet) => {
                            record.state = FiberState::Running;
                            record.cancel_hooks.clear();
                            Some((packet, record.cursor.clone(), Arc::clone(&record.cancelled)))
                        }
                        None => {
                            warn!(fiber_id = %id, "Parked fiber has no packet");
                            None
                        }
                    }
                }
                Some(record) => {
                    debug!(
                        fiber_id = %id,
                        state = %record.state,
                        expected = %expected,
                        "Ignoring stale resumption"
                    );
                    None
                }
                None => {
                    debug!(fiber_id = %id, "Ignoring resumption of finished fiber");
                    None
                }
            }
        };

        let Some((packet, cursor, cancelled)) = claimed else {
            return;
        };
        let engine = self.clone();
        self.inner.runtime.spawn(async move {
            engine.run_slice(id, packet, cursor, entry, &cancelled);
        });
    }

    /// Apply steps until the chain yields.
    fn run_slice(
        &self,
        id: FiberId,
        mut packet: Packet,
        cursor: Option<StepRef>,
        entry: Entry,
        cancelled: &AtomicBool,
    ) {
        let mut current = cursor;
        let mut entered: Option<String> = None;

        let mut action = match entry {
            Entry::Step(step) => NextAction::Invoke(step),
            Entry::Resume => reenter(current.as_ref()),
            Entry::With(resume_fn) => {
                let name = current.as_ref().map_or("<resume>", |s| s.name()).to_string();
                panic::catch_unwind(AssertUnwindSafe(|| resume_fn(&mut packet)))
                    .unwrap_or_else(|payload| panicked(&name, payload.as_ref()))
            }
            Entry::Join(outcomes) => {
                packet.put_component(CHILD_OUTCOMES_COMPONENT_NAME, outcomes);
                reenter(current.as_ref())
            }
        };

        loop {
            if cancelled.load(Ordering::Acquire) {
                self.finish_running(id, FiberStatus::Cancelled, packet, entered);
                return;
            }

            action = match action {
                NextAction::Invoke(step) => {
                    debug!(fiber_id = %id, step = step.name(), "Applying step");
                    entered = Some(step.name().to_string());
                    let verdict = panic::catch_unwind(AssertUnwindSafe(|| step.apply(&mut packet)))
                        .unwrap_or_else(|payload| panicked(step.name(), payload.as_ref()));
                    current = Some(step);
                    verdict
                }
                NextAction::Done => {
                    self.finish_running(id, FiberStatus::Completed, packet, entered);
                    return;
                }
                NextAction::Terminate(cause) => {
                    self.finish_running(id, FiberStatus::Failed(cause), packet, entered);
                    return;
                }
                NextAction::RetryAfter { delay, step } => {
                    self.park_for_retry(id, packet, step, delay, entered);
                    return;
                }
                NextAction::Suspend(suspension) => {
                    self.park_suspended(id, packet, suspension, current, entered);
                    return;
                }
            };
        }
    }

    fn finish_running(
        &self,
        id: FiberId,
        status: FiberStatus,
        packet: Packet,
        entered: Option<String>,
    ) {
        let mut effects = Effects::default();
        {
            let mut table = self.inner.table.lock();
            if let Some(record) = table.fibers.get_mut(&id) {
                if entered.is_some() {
                    record.last_step = entered;
                }
                record.state = status.state();
            }
            table.finish(id, status, packet, &mut effects);
        }
        self.apply(effects);
    }

    fn park_suspended(
        &self,
        id: FiberId,
        packet: Packet,
        suspension: Suspension,
        current: Option<StepRef>,
        entered: Option<String>,
    ) {
        let Suspension {
            on_suspend,
            resume_at,
        } = suspension;

        let mut effects = Effects::default();
        let epoch = {
            let mut table = self.inner.table.lock();
            let Some(record) = table.fibers.get_mut(&id) else {
                return;
            };
            record.state = FiberState::Suspended;
            record.epoch = record.epoch.wrapping_add(1);
            record.cursor = resume_at.or(current);
            record.packet = Some(packet);
            if entered.is_some() {
                record.last_step = entered;
            }

            if record.is_cancelled() {
                let packet = record.packet.take().unwrap_or_default();
                table.finish(id, FiberStatus::Cancelled, packet, &mut effects);
                None
            } else {
                Some(record.epoch)
            }
        };
        self.apply(effects);

        let Some(epoch) = epoch else {
            return;
        };
        debug!(fiber_id = %id, epoch, "Fiber suspended");

        let resumer = Resumer {
            engine: self.clone(),
            fiber_id: id,
            epoch,
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || on_suspend(resumer))) {
            let reason = format!(
                "suspension callback panicked: {}",
                panic_message(payload.as_ref())
            );
            warn!(fiber_id = %id, reason = %reason, "Aborting fiber");
            self.dispatch(
                id,
                FiberState::Suspended,
                epoch,
                Entry::With(Box::new(move |_| {
                    NextAction::Terminate(FiberError::contract_violation(reason))
                })),
            );
        }
    }

    fn park_for_retry(
        &self,
        id: FiberId,
        packet: Packet,
        step: StepRef,
        delay: Duration,
        entered: Option<String>,
    ) {
        let mut effects = Effects::default();
        let epoch = {
            let mut table = self.inner.table.lock();
            let Some(record) = table.fibers.get_mut(&id) else {
                return;
            };
            record.state = FiberState::RetryWait;
            record.epoch = record.epoch.wrapping_add(1);
            record.cursor = Some(step);
            record.packet = Some(packet);
            record.retries = record.retries.saturating_add(1);
            if entered.is_some() {
                record.last_step = entered;
            }

            if record.is_cancelled() {
                let packet = record.packet.take().unwrap_or_default();
                table.finish(id, FiberStatus::Cancelled, packet, &mut effects);
                None
            } else {
                Some(record.epoch)
            }
        };
        self.apply(effects);

        let Some(epoch) = epoch else {
            return;
        };
        debug!(fiber_id = %id, delay = ?delay, "Fiber waiting to retry");

        let engine = self.clone();
        let timer = self.schedule(delay, move || {
            engine.dispatch(id, FiberState::RetryWait, epoch, Entry::Resume);
        });
        self.register_hook(id, epoch, Box::new(move || timer.cancel()));
    }

    /// Attach a cancel hook to the parking identified by `epoch`.
    ///
    /// If that parking is already over the hook runs right away.
    fn register_hook(&self, id: FiberId, epoch: u64, hook: CancelHook) {
        let rejected = {
            let mut table = self.inner.table.lock();
            match table.fibers.get_mut(&id) {
                Some(record) if record.epoch == epoch && record.state.is_parked() => {
                    record.cancel_hooks.push(hook);
                    None
                }
                _ => Some(hook),
            }
        };
        if let Some(hook) = rejected {
            hook();
        }
    }

    fn fork(&self, parent_id: FiberId, epoch: u64, children: Vec<(StepRef, Packet)>, join: StepRef) {
        let mut effects = Effects::default();
        {
            let mut table = self.inner.table.lock();
            let Some(parent) = table.fibers.get_mut(&parent_id) else {
                return;
            };
            if parent.state != FiberState::Suspended || parent.epoch != epoch {
                debug!(fiber_id = %parent_id, state = %parent.state, "Ignoring stale fork");
                return;
            }

            let children: Vec<(FiberId, StepRef, Packet)> = children
                .into_iter()
                .map(|(step, packet)| (FiberId::new(), step, packet))
                .collect();

            parent.state = FiberState::AwaitingChildren;
            parent.epoch = parent.epoch.wrapping_add(1);
            parent.cursor = Some(join);
            parent.awaiting.extend(children.iter().map(|(id, _, _)| *id));
            let parent_epoch = parent.epoch;
            info!(fiber_id = %parent_id, children = children.len(), "Forking child fibers");

            if children.is_empty() {
                effects.dispatches.push((
                    parent_id,
                    FiberState::AwaitingChildren,
                    parent_epoch,
                    Entry::Join(Vec::new()),
                ));
            }

            for (child_id, step, packet) in children {
                table.fibers.insert(
                    child_id,
                    FiberRecord::new(step.clone(), packet, Some(parent_id), None),
                );
                effects
                    .dispatches
                    .push((child_id, FiberState::Ready, 0, Entry::Step(step)));
            }
        }
        self.apply(effects);
    }

    fn apply(&self, effects: Effects) {
        let Effects {
            hooks,
            dispatches,
            completions,
            idle,
        } = effects;

        for hook in hooks {
            hook();
        }
        for (id, expected, epoch, entry) in dispatches {
            self.dispatch(id, expected, epoch, entry);
        }
        for (sender, outcome) in completions {
            if sender.send(outcome).is_err() {
                debug!("Fiber handle dropped before its outcome was delivered");
            }
        }
        if idle {
            self.inner.idle.notify_waiters();
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.inner.settings)
            .field("accepting", &self.is_accepting())
            .field("live_fibers", &self.live_fibers())
            .finish()
    }
}

/// Single-use token that resumes a suspended fiber.
///
/// Handed to the suspension callback of [`NextAction::Suspend`]. Every
/// resume method consumes the token, so a suspension can be resumed at most
/// once. A resumption that arrives after the fiber was cancelled is ignored.
pub struct Resumer {
    engine: Engine,
    fiber_id: FiberId,
    epoch: u64,
}

impl Resumer {
    /// Fiber this token resumes.
    #[must_use]
    pub const fn fiber_id(&self) -> FiberId {
        self.fiber_id
    }

    /// Engine the fiber belongs to (for timers).
    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run `hook` if the fiber is cancelled while this suspension lasts.
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.engine
            .register_hook(self.fiber_id, self.epoch, Box::new(hook));
    }

    /// Continue at the suspending step, or at the step named when suspending.
    pub fn resume(self) {
        self.engine
            .dispatch(self.fiber_id, FiberState::Suspended, self.epoch, Entry::Resume);
    }

    /// Continue at `step`.
    pub fn resume_at(self, step: StepRef) {
        self.engine.dispatch(
            self.fiber_id,
            FiberState::Suspended,
            self.epoch,
            Entry::Step(step),
        );
    }

    /// Run `f` on the resumed fiber's packet and continue as its verdict says.
    pub fn resume_with<F>(self, f: F)
    where
        F: FnOnce(&mut Packet) -> NextAction + Send + 'static,
    {
        self.engine.dispatch(
            self.fiber_id,
            FiberState::Suspended,
            self.epoch,
            Entry::With(Box::new(f)),
        );
    }

    /// Start child fibers and continue at `join` once all are terminal.
    pub fn fork(self, children: Vec<(StepRef, Packet)>, join: StepRef) {
        self.engine.fork(self.fiber_id, self.epoch, children, join);
    }
}

impl fmt::Debug for Resumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumer")
            .field("fiber_id", &self.fiber_id)
            .field("epoch", &self.epoch)
            .finish()
    }
}

fn reenter(step: Option<&StepRef>) -> NextAction {
    step.map_or_else(
        || NextAction::Terminate(FiberError::contract_violation("resumed fiber has no step")),
        |step| NextAction::Invoke(step.clone()),
    )
}

fn panicked(step: &str, payload: &(dyn Any + Send)) -> NextAction {
    let message = panic_message(payload);
    warn!(step, reason = %message, "Step panicked, aborting fiber");
    NextAction::Terminate(FiberError::step_panicked(step, message))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
