//! The engine's shared timer facility.
//!
//! One thread per engine owns a deadline heap. Expiry jobs are small
//! closures that hand resolution work back to the engine's worker pool;
//! user computation never runs on the timer thread. Entries can be
//! cancelled best-effort through a [`TimerHandle`], in which case they are
//! discarded when they come due.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{
    Arc, Condvar, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send>;

struct Entry {
    deadline: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    job: Job,
}

// Min-heap on (deadline, seq): earlier deadlines first, insertion order
// breaking ties.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Queue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    cv: Condvar,
}

/// Cancels a scheduled deadline. Best-effort: a deadline that already fired
/// is unaffected.
pub(crate) struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

/// Deadline registry backed by a dedicated thread.
pub(crate) struct Timer {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    pub(crate) fn new() -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("taskweave-timer".into())
            .spawn(move || Self::run(&worker))?;
        Ok(Timer {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Registers `job` to fire once `delay` has elapsed.
    pub(crate) fn schedule(
        &self,
        delay: Duration,
        job: impl FnOnce() + Send + 'static,
    ) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut queue = self.shared.queue.lock().expect("timer queue poisoned");
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Entry {
            deadline: Instant::now() + delay,
            seq,
            cancelled: Arc::clone(&cancelled),
            job: Box::new(job),
        });
        drop(queue);
        self.shared.cv.notify_one();
        TimerHandle { cancelled }
    }

    /// Stops the timer thread and drops every pending deadline.
    pub(crate) fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock().expect("timer queue poisoned");
            queue.shutdown = true;
            queue.heap.clear();
        }
        self.shared.cv.notify_all();
        if let Some(thread) = self.thread.lock().expect("timer thread poisoned").take() {
            let _ = thread.join();
        }
    }

    fn run(shared: &Shared) {
        let mut queue = shared.queue.lock().expect("timer queue poisoned");
        loop {
            if queue.shutdown {
                return;
            }
            let now = Instant::now();
            let mut due = Vec::new();
            while queue
                .heap
                .peek()
                .is_some_and(|entry| entry.deadline <= now)
            {
                // Entries are popped under the lock but fired outside it.
                let entry = queue.heap.pop().expect("peeked entry present");
                if !entry.cancelled.load(Ordering::Relaxed) {
                    due.push(entry.job);
                }
            }
            if !due.is_empty() {
                drop(queue);
                for job in due {
                    job();
                }
                queue = shared.queue.lock().expect("timer queue poisoned");
                continue;
            }
            queue = match queue.heap.peek().map(|entry| entry.deadline) {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline <= now {
                        continue;
                    }
                    shared
                        .cv
                        .wait_timeout(queue, deadline - now)
                        .expect("timer queue poisoned")
                        .0
                }
                None => shared.cv.wait(queue).expect("timer queue poisoned"),
            };
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let timer = Timer::new().unwrap();
        let (tx, rx) = mpsc::channel();

        let tx1 = tx.clone();
        timer.schedule(Duration::from_millis(40), move || tx1.send(2).unwrap());
        timer.schedule(Duration::from_millis(10), move || tx.send(1).unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 2);
    }

    #[test]
    fn cancelled_entries_do_not_fire() {
        let timer = Timer::new().unwrap();
        let (tx, rx) = mpsc::channel();

        let handle = timer.schedule(Duration::from_millis(20), move || tx.send(()).unwrap());
        handle.cancel();

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn shutdown_drops_pending_deadlines() {
        let timer = Timer::new().unwrap();
        let (tx, rx) = mpsc::channel();
        timer.schedule(Duration::from_millis(50), move || tx.send(()).unwrap());
        timer.shutdown();
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }
}
