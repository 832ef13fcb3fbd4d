//! Composable task graphs with a managed scheduler and execution tracing.
//!
//! `taskweave` provides a deferred [`Task`] abstraction: callers build
//! graphs of dependent computations purely through combinators (`map`,
//! `and_then`, `recover`, `with_timeout`, `with_side_effect`, ...) and hand
//! root tasks to an [`Engine`], which schedules them onto a worker pool and
//! drives each task's state machine to completion. Nothing executes at
//! construction time.
//!
//! Completion semantics are deterministic: every task resolves exactly
//! once (races such as timeouts are settled by an atomic first-writer-wins
//! resolution), cancellation is cooperative and only affects tasks that
//! have not started, and failures propagate unchanged unless a recovery
//! combinator absorbs them.
//!
//! Each task also owns a node in a diagnostic trace graph recording what
//! ran, when, with what outcome, and how tasks related to each other
//! (parent, potential parent, fire-and-forget child). The trace is a side
//! channel: it observes execution without perturbing it, and
//! [`count_tasks`] walks it as of query time.
//!
//! Features include:
//! - An `Engine` owning its worker pool and timer facility, so multiple
//!   independent engines can coexist
//! - Blocking (`Task::wait`, `Engine::run_and_wait`) and async
//!   (`Task::done`) wait primitives
//! - A `TaskError` taxonomy distinguishing computation failures, the
//!   timeout sentinel, and cancellation

pub mod attempt;
pub mod compose;
pub mod engine;
pub mod error;
pub mod promise;
pub mod task;
mod timer;
pub mod trace;
pub mod wait;

pub use attempt::Attempt;
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, TaskError};
pub use promise::{Outcome, Promise};
pub use task::{State, Task};
pub use trace::{Relation, ResultKind, Trace, TraceNode, count_tasks};
pub use wait::TaskFuture;
