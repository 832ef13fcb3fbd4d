//! Defines the `Task` struct and its lifecycle.
//!
//! A `Task` is a deferred unit of computation with a single terminal
//! outcome. Construction never executes anything; execution happens when an
//! [`Engine`](crate::engine::Engine) schedules the task onto one of its
//! workers. Each task owns one [`Promise`] for its result and one
//! [`TraceNode`] recording what ran.
//!
//! `Task<T>` is a cheap cloneable handle, so callers can keep a task around
//! to query its state, cancel it, or read its trace after submission. The
//! combinators that build new tasks from existing ones live in
//! [`compose`](crate::compose).

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
};
use std::time::Duration;

use crate::engine::Engine;
use crate::error::TaskError;
use crate::promise::{Outcome, Promise};
use crate::trace::{ResultKind, Trace, TraceNode};
use crate::wait::TaskFuture;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const FAILED: u8 = 3;
const CANCELLED: u8 = 4;

/// Lifecycle state of a task. Transitions are monotonic; `Done`, `Failed`,
/// and `Cancelled` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

// The deferred computation: runs at most once, on an engine worker, and is
// responsible for (eventually) resolving the task.
pub(crate) type Work<T> = Box<dyn FnOnce(&Engine, &Task<T>) + Send>;

pub(crate) struct TaskInner<T> {
    name: String,
    id: u64,
    state: AtomicU8,
    // Claimed by the first scheduling attempt so a task is enqueued once
    // even when several compositions reference it.
    queued: AtomicBool,
    promise: Promise<T>,
    node: Arc<TraceNode>,
    work: Mutex<Option<Work<T>>>,
}

/// A deferred, composable unit of computation with a single terminal outcome.
pub struct Task<T> {
    inner: Arc<TaskInner<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Task {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Task<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn with_work(name: &str, work: Work<T>) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Task {
            inner: Arc::new(TaskInner {
                name: name.to_owned(),
                id,
                state: AtomicU8::new(PENDING),
                queued: AtomicBool::new(false),
                promise: Promise::new(),
                node: TraceNode::new(id, name),
                work: Mutex::new(Some(work)),
            }),
        }
    }

    /// Creates a task that runs `f` when scheduled and resolves with its
    /// return value.
    pub fn callable(name: &str, f: impl FnOnce() -> T + Send + 'static) -> Self {
        Self::with_work(
            name,
            Box::new(move |_, this| {
                this.resolve(Ok(f()));
            }),
        )
    }

    /// Creates a task whose computation may fail; an `Err` resolves the
    /// task Failed with that error as cause.
    pub fn fallible(
        name: &str,
        f: impl FnOnce() -> Result<T, TaskError> + Send + 'static,
    ) -> Self {
        Self::with_work(
            name,
            Box::new(move |_, this| {
                this.resolve(f().map_err(Arc::new));
            }),
        )
    }

    /// Creates a task that resolves with a fixed value.
    pub fn value(name: &str, value: T) -> Self {
        Self::callable(name, move || value)
    }

    /// Creates a task that always fails with the given message.
    pub fn failure(name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::fallible(name, move || Err(TaskError::Failed(message)))
    }

    /// Creates a task that resolves with `value` once `delay` has elapsed
    /// after the task starts, using the engine's timer facility.
    pub fn delayed_value(name: &str, value: T, delay: Duration) -> Self {
        Self::with_work(
            name,
            Box::new(move |engine, this| {
                let resolver = this.clone();
                let pool = engine.clone();
                let handle = engine.timer().schedule(delay, move || {
                    pool.spawn_job(move || {
                        resolver.resolve(Ok(value));
                    });
                });
                // If something else resolves the task first (a lost timeout
                // race), drop the pending deadline.
                this.on_complete(move |_| handle.cancel());
            }),
        )
    }

    /// Creates a task that drives an arbitrary future on the engine's
    /// worker pool and resolves with its output.
    pub fn from_future(name: &str, future: impl Future<Output = T> + Send + 'static) -> Self {
        Self::with_work(
            name,
            Box::new(move |engine, this| {
                let this = this.clone();
                engine.spawn_future(async move {
                    let value = future.await;
                    this.resolve(Ok(value));
                });
            }),
        )
    }

    /// The stable name given at construction, used in traces and logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The generated task id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        match self.inner.state.load(Ordering::Acquire) {
            PENDING => State::Pending,
            RUNNING => State::Running,
            DONE => State::Done,
            FAILED => State::Failed,
            CANCELLED => State::Cancelled,
            _ => unreachable!("invalid task state"),
        }
    }

    /// True once the task reached any terminal state.
    pub fn is_done(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) >= DONE
    }

    /// True only for `Failed`; cancellation is a distinct terminal state.
    pub fn is_failed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == FAILED
    }

    /// Requests cancellation.
    ///
    /// Succeeds only while the task is still `Pending`: the task resolves
    /// `Cancelled` with the supplied cause and its computation never runs.
    /// Returns `false` once the task is running or terminal; a running task
    /// completes with its natural outcome.
    pub fn cancel(&self, cause: impl Into<String>) -> bool {
        if self
            .inner
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let cause = cause.into();
        tracing::debug!(task = %self.inner.name, id = self.inner.id, %cause, "task cancelled");
        self.inner
            .node
            .mark_finished(ResultKind::Cancellation, Some(cause.clone()));
        self.inner
            .promise
            .try_resolve(Err(Arc::new(TaskError::Cancelled(cause))));
        true
    }

    /// Blocks the calling thread until the task is terminal or `timeout`
    /// elapses; returns whether the task is terminal.
    ///
    /// This is caller-side synchronization only; it occupies no engine
    /// worker and leaves no mark in the trace.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.inner.promise.wait(timeout)
    }

    /// An async wait primitive resolving to this task's outcome, pollable
    /// from any executor.
    pub fn done(&self) -> TaskFuture<T> {
        TaskFuture::new(self.clone())
    }

    /// The error that terminated the task, if it failed or was cancelled.
    pub fn error(&self) -> Option<Arc<TaskError>> {
        match self.inner.promise.outcome() {
            Some(Err(e)) => Some(Arc::clone(e)),
            _ => None,
        }
    }

    /// A snapshot handle of the trace graph rooted at this task.
    pub fn trace(&self) -> Trace {
        Trace::new(Arc::clone(&self.inner.node))
    }

    pub(crate) fn node(&self) -> &Arc<TraceNode> {
        &self.inner.node
    }

    /// Registers a continuation on this task's promise.
    pub(crate) fn on_complete(&self, listener: impl FnOnce(&Outcome<T>) + Send + 'static) {
        self.inner.promise.on_complete(listener);
    }

    pub(crate) fn claim_queued(&self) -> bool {
        !self.inner.queued.swap(true, Ordering::AcqRel)
    }

    /// Runs the task's computation. Called from exactly one engine worker;
    /// the `Pending -> Running` transition guards against re-entry and
    /// against running a cancelled task.
    pub(crate) fn execute(&self, engine: &Engine) {
        if self
            .inner
            .state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.inner.node.mark_started();
        tracing::trace!(task = %self.inner.name, id = self.inner.id, "task running");
        let work = self.inner.work.lock().expect("task work poisoned").take();
        if let Some(work) = work {
            // A panicking computation must neither hang the task nor unwind
            // into the worker pool; it resolves the task Failed instead.
            let unwound =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| work(engine, self)));
            if let Err(payload) = unwound {
                self.resolve(Err(TaskError::from_panic(payload)));
            }
        }
    }

    /// Resolves the task with `outcome`. The first resolution wins; later
    /// attempts (a lost race, a duplicate continuation) are no-ops.
    pub(crate) fn resolve(&self, outcome: Outcome<T>) -> bool {
        self.resolve_inner(outcome, None)
    }

    /// Resolves the task with the outcome adopted from the race branch
    /// `winner_id`, promoting that branch's edge. The promotion happens
    /// after the state claim but before the trace node's terminal stamp, so
    /// a terminal node is never mutated and a lost race never promotes.
    pub(crate) fn adopt(&self, outcome: Outcome<T>, winner_id: u64) -> bool {
        self.resolve_inner(outcome, Some(winner_id))
    }

    fn resolve_inner(&self, outcome: Outcome<T>, adopted: Option<u64>) -> bool {
        let (kind, target, preview) = match &outcome {
            Ok(_) => (ResultKind::Success, DONE, None),
            Err(e) if e.is_cancelled() => {
                (ResultKind::Cancellation, CANCELLED, Some(e.to_string()))
            }
            Err(e) => (ResultKind::Failure, FAILED, Some(e.to_string())),
        };
        // Claim the terminal state before touching the promise so listeners
        // observe a consistent task.
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            if current >= DONE {
                return false;
            }
            match self.inner.state.compare_exchange_weak(
                current,
                target,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        tracing::debug!(
            task = %self.inner.name,
            id = self.inner.id,
            result = ?kind,
            "task resolved"
        );
        if let Some(winner_id) = adopted {
            self.inner.node.promote(winner_id);
        }
        self.inner.node.mark_finished(kind, preview);
        let won = self.inner.promise.try_resolve(outcome);
        debug_assert!(won, "state claim implies promise resolution");
        true
    }
}

impl<T> Task<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Returns the resolved value.
    ///
    /// Fails with [`TaskError::IllegalState`] unless the task is `Done`; a
    /// failed task's error is raised by the engine's wait surface, not here.
    pub fn get(&self) -> Result<T, TaskError> {
        match self.inner.promise.outcome() {
            Some(Ok(value)) => Ok(value.clone()),
            _ => Err(TaskError::IllegalState(format!(
                "task '{}' is not done",
                self.inner.name
            ))),
        }
    }

    pub(crate) fn outcome_cloned(&self) -> Option<Outcome<T>> {
        self.inner.promise.outcome().map(|outcome| match outcome {
            Ok(v) => Ok(v.clone()),
            Err(e) => Err(Arc::clone(e)),
        })
    }
}

impl Task<()> {
    // Timer branch of a `with_timeout` race: resolves `Ok(())` once the
    // duration elapses.
    pub(crate) fn timer(name: &str, duration: Duration) -> Self {
        Task::delayed_value(name, (), duration)
    }
}

impl<T> std::fmt::Debug for Task<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}
