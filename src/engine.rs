//! The execution engine: worker pool, timer facility, and wait surface.
//!
//! An `Engine` is an explicitly constructed, explicitly owned scheduler.
//! There is no process-wide pool, so independent engines (one per test, per
//! subsystem) coexist without interference. Root tasks are submitted with
//! [`Engine::run`]; combinator continuations schedule dependent tasks as
//! promises resolve. [`Engine::run_and_wait`] layers a blocking wait on top
//! and raises failures with the original error preserved as the cause.

use std::time::Duration;

use futures::executor::{ThreadPool, ThreadPoolBuilder};

use crate::error::EngineError;
use crate::task::Task;
use crate::timer::Timer;

const DEFAULT_POOL_SIZE: usize = 8;

/// Configures and builds an [`Engine`].
pub struct EngineBuilder {
    workers: usize,
}

impl EngineBuilder {
    /// Number of worker execution contexts in the pool.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Starts the worker pool and the timer thread.
    pub fn build(self) -> Result<Engine, EngineError> {
        let pool = ThreadPoolBuilder::new()
            .pool_size(self.workers)
            .name_prefix("taskweave-worker-")
            .create()?;
        let timer = Timer::new()?;
        tracing::debug!(workers = self.workers, "engine started");
        Ok(Engine {
            inner: std::sync::Arc::new(EngineInner { pool, timer }),
        })
    }
}

struct EngineInner {
    pool: ThreadPool,
    timer: Timer,
}

/// Schedules tasks onto a pool of worker execution contexts and drives
/// their state machines to completion.
///
/// Cheap to clone; all clones share the same pool and timer.
#[derive(Clone)]
pub struct Engine {
    inner: std::sync::Arc<EngineInner>,
}

impl Engine {
    /// An engine with the default pool size.
    pub fn new() -> Result<Self, EngineError> {
        Self::builder().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            workers: DEFAULT_POOL_SIZE,
        }
    }

    /// Submits a root task for execution. Submitting the same task again
    /// is a no-op.
    pub fn run<T>(&self, task: &Task<T>)
    where
        T: Send + Sync + 'static,
    {
        self.schedule(task);
    }

    /// Submits `task` and blocks until it is terminal or `timeout` elapses.
    ///
    /// A failed or cancelled task surfaces as [`EngineError::Failed`] with
    /// the task's own error as the cause; an elapsed deadline surfaces as
    /// [`EngineError::WaitDeadline`] and leaves the task running.
    pub fn run_and_wait<T>(
        &self,
        name: &str,
        task: &Task<T>,
        timeout: Option<Duration>,
    ) -> Result<T, EngineError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.schedule(task);
        if !task.wait(timeout) {
            let timeout = timeout.expect("unbounded wait only returns once terminal");
            tracing::debug!(wait = name, ?timeout, "wait deadline elapsed");
            return Err(EngineError::WaitDeadline {
                name: name.to_owned(),
                timeout,
            });
        }
        match task.get() {
            Ok(value) => Ok(value),
            Err(_) => {
                let cause = task
                    .error()
                    .expect("terminal task without value carries an error");
                Err(EngineError::Failed {
                    name: name.to_owned(),
                    cause,
                })
            }
        }
    }

    /// Stops the timer facility, dropping pending deadlines. Queued pool
    /// work is dropped with the pool when the last engine handle goes away.
    pub fn shutdown(&self) {
        tracing::debug!("engine shutting down");
        self.inner.timer.shutdown();
    }

    /// Enqueues `task` onto the worker pool once; the `Pending -> Running`
    /// transition inside `execute` is the final guard against re-entry.
    pub(crate) fn schedule<T>(&self, task: &Task<T>)
    where
        T: Send + Sync + 'static,
    {
        if !task.claim_queued() {
            return;
        }
        if task.is_done() {
            // Cancelled before it was ever submitted.
            return;
        }
        tracing::trace!(task = %task.name(), id = task.id(), "task scheduled");
        let task = task.clone();
        let engine = self.clone();
        self.inner.pool.spawn_ok(async move {
            task.execute(&engine);
        });
    }

    /// Runs a small resolution job on a worker context. Used by the timer
    /// so expiries never resolve promises from the timer thread.
    pub(crate) fn spawn_job(&self, job: impl FnOnce() + Send + 'static) {
        self.inner.pool.spawn_ok(async move { job() });
    }

    pub(crate) fn spawn_future(&self, future: impl Future<Output = ()> + Send + 'static) {
        self.inner.pool.spawn_ok(future);
    }

    pub(crate) fn timer(&self) -> &Timer {
        &self.inner.timer
    }
}
