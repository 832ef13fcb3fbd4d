//! The single-assignment result cell underlying every task.
//!
//! A `Promise` is resolved exactly once; under concurrent attempts (for
//! example both branches of a timeout race) an atomic state tag decides the
//! single winner and every later attempt is a silent no-op. Completion
//! listeners registered before resolution run in registration order,
//! synchronously on the thread that resolves; listeners registered after
//! resolution run immediately on the registering thread.

use std::sync::{
    Condvar, Mutex, OnceLock,
    atomic::{AtomicU8, Ordering},
};
use std::time::{Duration, Instant};

use crate::error::TaskError;

/// A resolved task value or the error that terminated it.
pub type Outcome<T> = Result<T, std::sync::Arc<TaskError>>;

type Listener<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

const EMPTY: u8 = 0;
const RESOLVED: u8 = 1;

struct ListenerQueue<T> {
    pending: Vec<Listener<T>>,
    // Set once the resolver has taken the queue; late registrations run
    // immediately instead of being enqueued.
    drained: bool,
}

/// Single-assignment result cell with completion listeners.
pub struct Promise<T> {
    state: AtomicU8,
    cell: OnceLock<Outcome<T>>,
    listeners: Mutex<ListenerQueue<T>>,
    cv: Condvar,
}

impl<T> Promise<T> {
    pub fn new() -> Self {
        Promise {
            state: AtomicU8::new(EMPTY),
            cell: OnceLock::new(),
            listeners: Mutex::new(ListenerQueue {
                pending: Vec::new(),
                drained: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Attempts to resolve the promise with `outcome`.
    ///
    /// Returns `true` only for the single winning caller; the value is never
    /// overwritten afterwards. The winner runs all registered listeners in
    /// registration order before returning.
    pub fn try_resolve(&self, outcome: Outcome<T>) -> bool {
        if self
            .state
            .compare_exchange(EMPTY, RESOLVED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        // The CAS above makes this `set` the only one ever attempted.
        let _ = self.cell.set(outcome);

        let pending = {
            let mut queue = self.listeners.lock().expect("promise listeners poisoned");
            queue.drained = true;
            self.cv.notify_all();
            std::mem::take(&mut queue.pending)
        };
        let outcome = self.cell.get().expect("resolved promise holds an outcome");
        for listener in pending {
            listener(outcome);
        }
        true
    }

    /// Registers a completion listener.
    ///
    /// Invoked exactly once: either by the resolver (in registration order)
    /// or immediately if the promise is already resolved.
    pub fn on_complete(&self, listener: impl FnOnce(&Outcome<T>) + Send + 'static) {
        {
            let mut queue = self.listeners.lock().expect("promise listeners poisoned");
            if !queue.drained {
                queue.pending.push(Box::new(listener));
                return;
            }
        }
        let outcome = self.cell.get().expect("drained promise holds an outcome");
        listener(outcome);
    }

    /// True once the promise holds its outcome.
    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }

    /// The resolved outcome, if any.
    pub fn outcome(&self) -> Option<&Outcome<T>> {
        self.cell.get()
    }

    /// Blocks the calling thread until the promise resolves or `timeout`
    /// elapses. Returns whether the promise is resolved.
    ///
    /// This is a caller-side synchronization primitive; engine workers never
    /// block here.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut queue = self.listeners.lock().expect("promise listeners poisoned");
        while !queue.drained {
            match deadline {
                None => {
                    queue = self
                        .cv
                        .wait(queue)
                        .expect("promise listeners poisoned");
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (q, _) = self
                        .cv
                        .wait_timeout(queue, deadline - now)
                        .expect("promise listeners poisoned");
                    queue = q;
                }
            }
        }
        true
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}
