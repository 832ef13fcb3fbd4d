//! Async wait primitive for task results.
//!
//! [`TaskFuture`] bridges a task's promise into any executor: awaiting it
//! yields the task's outcome without occupying an engine worker. Obtained
//! via [`Task::done`](crate::task::Task::done).

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use pin_project_lite::pin_project;

use crate::promise::Outcome;
use crate::task::Task;

pin_project! {
    /// Resolves to the task's outcome once it reaches a terminal state.
    #[must_use = "futures do nothing unless polled or .awaited"]
    pub struct TaskFuture<T> {
        task: Task<T>,
        // Re-armed on every poll; the completion listener takes it to wake.
        waker: Option<Arc<Mutex<Option<Waker>>>>,
    }
}

impl<T> TaskFuture<T> {
    pub(crate) fn new(task: Task<T>) -> Self {
        TaskFuture { task, waker: None }
    }
}

impl<T> Future for TaskFuture<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Some(outcome) = this.task.outcome_cloned() {
            return Poll::Ready(outcome);
        }
        match this.waker {
            Some(slot) => {
                *slot.lock().expect("waker slot poisoned") = Some(cx.waker().clone());
            }
            None => {
                let slot = Arc::new(Mutex::new(Some(cx.waker().clone())));
                let armed = Arc::clone(&slot);
                // If the task resolved between the check above and this
                // registration, the listener fires immediately and the
                // wakeup is not lost.
                this.task.on_complete(move |_| {
                    if let Some(waker) = armed.lock().expect("waker slot poisoned").take() {
                        waker.wake();
                    }
                });
                *this.waker = Some(slot);
            }
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_once_resolved() {
        let task: Task<i32> = Task::value("v", 0);
        task.resolve(Ok(3));
        let outcome = futures::executor::block_on(task.done());
        assert_eq!(outcome.unwrap(), 3);
    }

    #[test]
    fn wakes_on_late_resolution() {
        let task: Task<i32> = Task::value("v", 0);
        let resolver = task.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            resolver.resolve(Ok(11));
        });
        let outcome = futures::executor::block_on(task.done());
        assert_eq!(outcome.unwrap(), 11);
        handle.join().unwrap();
    }
}
