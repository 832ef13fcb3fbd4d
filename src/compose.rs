//! The combinator algebra over [`Task`].
//!
//! Every combinator is a pure constructor: it builds a new task (with its
//! own trace node, linked to the tasks it composes over) and performs no
//! execution. When the composed task is eventually scheduled, its work
//! registers continuations as promise listeners on its sources, so a task
//! waiting on a dependency never occupies an engine worker.
//!
//! Failure (and cancellation) propagates unchanged through the
//! value-transforming combinators; `recover`, `recover_with`,
//! `with_attempt`, and `inspect_err` are the only ones that look at an
//! error. A panicking user closure resolves the composed task Failed with
//! the panic message as cause; the unwind never reaches the worker pool.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use crate::attempt::Attempt;
use crate::error::TaskError;
use crate::promise::Outcome;
use crate::task::Task;
use crate::trace::Relation;

fn clone_outcome<T: Clone>(outcome: &Outcome<T>) -> Outcome<T> {
    match outcome {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(Arc::clone(e)),
    }
}

// Continuations run user closures on whatever worker resolves the source;
// a panic there is captured as this composition's failure.
fn run_user<R>(f: impl FnOnce() -> R) -> Result<R, Arc<TaskError>> {
    catch_unwind(AssertUnwindSafe(f)).map_err(TaskError::from_panic)
}

impl<T> Task<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Applies `f` to the value on the worker that resolves this task;
    /// failure passes through unchanged and `f` is never invoked for it.
    pub fn map<U>(&self, f: impl FnOnce(T) -> U + Send + 'static) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
    {
        let source = self.clone();
        let task = Task::with_work(
            "map",
            Box::new(move |engine, this| {
                let this = this.clone();
                source.on_complete(move |outcome| match outcome {
                    Ok(v) => {
                        let value = v.clone();
                        this.resolve(run_user(move || f(value)));
                    }
                    Err(e) => {
                        this.resolve(Err(Arc::clone(e)));
                    }
                });
                engine.schedule(&source);
            }),
        );
        task.node().add_edge(Relation::ParentOf, self.node());
        task
    }

    /// On success, invokes `f` to obtain a new task and delegates to it:
    /// the produced task is scheduled, becomes a real child in the trace,
    /// and its outcome becomes this composition's outcome.
    pub fn and_then<U>(&self, f: impl FnOnce(T) -> Task<U> + Send + 'static) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
    {
        let source = self.clone();
        let task = Task::with_work(
            "and_then",
            Box::new(move |engine, this| {
                let this = this.clone();
                let engine_cl = engine.clone();
                source.on_complete(move |outcome| match outcome {
                    Ok(v) => {
                        let value = v.clone();
                        match run_user(move || f(value)) {
                            Ok(sub) => {
                                this.node().add_edge(Relation::ParentOf, sub.node());
                                let this = this.clone();
                                sub.on_complete(move |o| {
                                    this.resolve(clone_outcome(o));
                                });
                                engine_cl.schedule(&sub);
                            }
                            Err(e) => {
                                this.resolve(Err(e));
                            }
                        }
                    }
                    Err(e) => {
                        this.resolve(Err(Arc::clone(e)));
                    }
                });
                engine.schedule(&source);
            }),
        );
        task.node().add_edge(Relation::ParentOf, self.node());
        task
    }

    /// On success, runs `next` and yields **its** value. On failure `next`
    /// is never started and remains a potential child in the trace.
    pub fn and<U>(&self, next: Task<U>) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
    {
        let source = self.clone();
        let next_cl = next.clone();
        let task = Task::with_work(
            "and",
            Box::new(move |engine, this| {
                let next_id = next_cl.id();
                let this = this.clone();
                let engine_cl = engine.clone();
                source.on_complete(move |outcome| match outcome {
                    Ok(_) => {
                        this.node().promote(next_id);
                        let this = this.clone();
                        next_cl.on_complete(move |o| {
                            this.resolve(clone_outcome(o));
                        });
                        engine_cl.schedule(&next_cl);
                    }
                    Err(e) => {
                        this.resolve(Err(Arc::clone(e)));
                    }
                });
                engine.schedule(&source);
            }),
        );
        task.node().add_edge(Relation::ParentOf, self.node());
        task.node().add_edge(Relation::PotentialParentOf, next.node());
        task
    }

    /// Runs a side-effecting consumer on the value, then yields the value
    /// unchanged; failures pass through without invoking the consumer. A
    /// panicking consumer becomes this task's failure.
    pub fn inspect(&self, f: impl FnOnce(&T) + Send + 'static) -> Task<T> {
        let source = self.clone();
        let task = Task::with_work(
            "inspect",
            Box::new(move |engine, this| {
                let this = this.clone();
                source.on_complete(move |outcome| match outcome {
                    Ok(v) => {
                        this.resolve(run_user(|| f(v)).map(|()| v.clone()));
                    }
                    Err(e) => {
                        this.resolve(Err(Arc::clone(e)));
                    }
                });
                engine.schedule(&source);
            }),
        );
        task.node().add_edge(Relation::ParentOf, self.node());
        task
    }

    /// Observes the error of a failing task without altering the outcome;
    /// a no-op on success.
    pub fn inspect_err(&self, f: impl FnOnce(&Arc<TaskError>) + Send + 'static) -> Task<T> {
        let source = self.clone();
        let task = Task::with_work(
            "inspect_err",
            Box::new(move |engine, this| {
                let this = this.clone();
                source.on_complete(move |outcome| {
                    if let Err(e) = outcome {
                        if let Err(panicked) = run_user(|| f(e)) {
                            this.resolve(Err(panicked));
                            return;
                        }
                    }
                    this.resolve(clone_outcome(outcome));
                });
                engine.schedule(&source);
            }),
        );
        task.node().add_edge(Relation::ParentOf, self.node());
        task
    }

    /// On failure, substitutes `f(error)` as the value; success passes
    /// through unchanged and the original error is fully absorbed.
    pub fn recover(&self, f: impl FnOnce(&Arc<TaskError>) -> T + Send + 'static) -> Task<T> {
        let source = self.clone();
        let task = Task::with_work(
            "recover",
            Box::new(move |engine, this| {
                let this = this.clone();
                source.on_complete(move |outcome| match outcome {
                    Ok(v) => {
                        this.resolve(Ok(v.clone()));
                    }
                    Err(e) => {
                        this.resolve(run_user(|| f(e)));
                    }
                });
                engine.schedule(&source);
            }),
        );
        task.node().add_edge(Relation::ParentOf, self.node());
        task
    }

    /// On failure, delegates to the recovery task produced by `f(error)`;
    /// if the recovery task itself fails, that failure is the final outcome
    /// and the original error is not resurfaced.
    pub fn recover_with(
        &self,
        f: impl FnOnce(&Arc<TaskError>) -> Task<T> + Send + 'static,
    ) -> Task<T> {
        let source = self.clone();
        let task = Task::with_work(
            "recover_with",
            Box::new(move |engine, this| {
                let this = this.clone();
                let engine_cl = engine.clone();
                source.on_complete(move |outcome| match outcome {
                    Ok(v) => {
                        this.resolve(Ok(v.clone()));
                    }
                    Err(e) => match run_user(|| f(e)) {
                        Ok(sub) => {
                            this.node().add_edge(Relation::ParentOf, sub.node());
                            let this = this.clone();
                            sub.on_complete(move |o| {
                                this.resolve(clone_outcome(o));
                            });
                            engine_cl.schedule(&sub);
                        }
                        Err(panicked) => {
                            this.resolve(Err(panicked));
                        }
                    },
                });
                engine.schedule(&source);
            }),
        );
        task.node().add_edge(Relation::ParentOf, self.node());
        task
    }

    /// Folds this task's outcome into an [`Attempt`]; the converted task
    /// never fails itself.
    pub fn with_attempt(&self) -> Task<Attempt<T>> {
        let source = self.clone();
        let task = Task::with_work(
            "with_attempt",
            Box::new(move |engine, this| {
                let this = this.clone();
                source.on_complete(move |outcome| {
                    this.resolve(Ok(Attempt::from(clone_outcome(outcome))));
                });
                engine.schedule(&source);
            }),
        );
        task.node().add_edge(Relation::ParentOf, self.node());
        task
    }

    /// Races this task against a timer of the given duration.
    ///
    /// If this task completes first its outcome is adopted and the timer
    /// branch is resolved `Cancelled`. If the timer fires first the result
    /// is the [`TaskError::Timeout`] sentinel; the source is left running
    /// and its eventual outcome is discarded by this composition. Each
    /// application adds two trace nodes: the timer and the race.
    pub fn with_timeout(&self, duration: Duration) -> Task<T> {
        let source = self.clone();
        let timer = Task::timer("timeout", duration);
        let timer_cl = timer.clone();
        let task = Task::with_work(
            "with_timeout",
            Box::new(move |engine, this| {
                let source_id = source.id();
                let timer_id = timer_cl.id();

                let race = this.clone();
                let timer_loser = timer_cl.clone();
                source.on_complete(move |outcome| {
                    if race.adopt(clone_outcome(outcome), source_id) {
                        timer_loser.resolve(Err(Arc::new(TaskError::Cancelled(
                            "timeout race lost".into(),
                        ))));
                    }
                });

                let race = this.clone();
                timer_cl.on_complete(move |outcome| {
                    if outcome.is_ok()
                        && race.adopt(Err(Arc::new(TaskError::Timeout)), timer_id)
                    {
                        tracing::debug!(race = race.name(), "timer won the race");
                    }
                });

                engine.schedule(&source);
                engine.schedule(&timer_cl);
            }),
        );
        task.node().add_edge(Relation::PotentialParentOf, self.node());
        task.node().add_edge(Relation::PotentialParentOf, timer.node());
        task
    }

    /// On success, derives a side-effect task via `f` and submits it to the
    /// engine independently; the composition completes with the source's
    /// value without waiting for it. On failure the side-effect task is
    /// never created.
    pub fn with_side_effect<U>(
        &self,
        f: impl FnOnce(&T) -> Task<U> + Send + 'static,
    ) -> Task<T>
    where
        U: Clone + Send + Sync + 'static,
    {
        let source = self.clone();
        let task = Task::with_work(
            "with_side_effect",
            Box::new(move |engine, this| {
                let this = this.clone();
                let engine_cl = engine.clone();
                source.on_complete(move |outcome| match outcome {
                    Ok(v) => match run_user(|| f(v)) {
                        Ok(side) => {
                            // Attach the subtree before resolving so the trace
                            // never misses a task that was actually submitted.
                            this.node().add_edge(Relation::PotentialChild, side.node());
                            engine_cl.schedule(&side);
                            this.resolve(Ok(v.clone()));
                        }
                        Err(panicked) => {
                            this.resolve(Err(panicked));
                        }
                    },
                    Err(e) => {
                        this.resolve(Err(Arc::clone(e)));
                    }
                });
                engine.schedule(&source);
            }),
        );
        task.node().add_edge(Relation::ParentOf, self.node());
        task
    }
}
