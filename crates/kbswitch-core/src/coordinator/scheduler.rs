// Kbswitch Coordinator - Scheduler
// Delayed task execution, real threads in production and a virtual clock in tests

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::shutdown::Shutdown;

/// Work to run once a delay has elapsed
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs tasks after a delay, off the caller's thread
pub trait Scheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed. Zero delay still defers.
    fn schedule(&self, delay: Duration, task: Task);

    /// Abandon every pending task; later schedules are dropped
    fn cancel_all(&self);
}

/// Scheduler with one sleeping thread per pending task.
///
/// Pending tasks wait on a shared shutdown flag, so `cancel_all` wakes
/// and abandons them immediately.
#[derive(Default)]
pub struct ThreadScheduler {
    shutdown: Arc<Shutdown>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        if self.shutdown.is_triggered() {
            return;
        }

        let shutdown = Arc::clone(&self.shutdown);
        let spawned = thread::Builder::new()
            .name("kbswitch-delay".to_string())
            .spawn(move || {
                if !shutdown.wait_timeout(delay) {
                    task();
                }
            });

        match spawned {
            Ok(handle) => {
                let mut handles = self.handles.lock();
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
            Err(e) => log::error!("Failed to spawn delay thread: {}", e),
        }
    }

    fn cancel_all(&self) {
        self.shutdown.trigger();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

struct ManualTask {
    due: Duration,
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    tasks: Vec<ManualTask>,
    cancelled: bool,
}

/// Scheduler driven by an explicit virtual clock.
///
/// Nothing runs until `advance` moves the clock past a task's due time;
/// due tasks run on the caller's thread in due-time order.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time since creation
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of tasks not yet run
    pub fn pending(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Move the clock forward and run every task that became due.
    ///
    /// Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let due = {
            let mut state = self.state.lock();
            state.now += by;
            let now = state.now;

            let (mut due, pending): (Vec<_>, Vec<_>) =
                state.tasks.drain(..).partition(|t| t.due <= now);
            state.tasks = pending;
            due.sort_by_key(|t| (t.due, t.seq));
            due
        };

        let count = due.len();
        for task in due {
            (task.task)();
        }
        count
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        let mut state = self.state.lock();
        if state.cancelled {
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + delay;
        state.tasks.push(ManualTask { due, seq, task });
    }

    fn cancel_all(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        state.tasks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_manual_runs_only_when_due() {
        let scheduler = ManualScheduler::new();
        let (tx, rx) = mpsc::channel();

        let tx2 = tx.clone();
        scheduler.schedule(Duration::from_millis(500), Box::new(move || tx2.send(500).unwrap()));
        scheduler.schedule(Duration::from_millis(100), Box::new(move || tx.send(100).unwrap()));

        assert_eq!(scheduler.advance(Duration::from_millis(99)), 0);
        assert!(rx.try_recv().is_err());

        assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
        assert_eq!(rx.try_recv().unwrap(), 100);

        assert_eq!(scheduler.advance(Duration::from_secs(1)), 1);
        assert_eq!(rx.try_recv().unwrap(), 500);
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.now(), Duration::from_millis(1100));
    }

    #[test]
    fn test_manual_runs_in_due_order() {
        let scheduler = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (delay, label) in [(300u64, "c"), (100, "a"), (200, "b"), (100, "a2")] {
            let order = Arc::clone(&order);
            scheduler.schedule(
                Duration::from_millis(delay),
                Box::new(move || order.lock().push(label)),
            );
        }
        scheduler.advance(Duration::from_secs(1));
        assert_eq!(*order.lock(), vec!["a", "a2", "b", "c"]);
    }

    #[test]
    fn test_manual_cancel_all() {
        let scheduler = ManualScheduler::new();
        scheduler.schedule(Duration::from_millis(10), Box::new(|| panic!("cancelled task ran")));
        scheduler.cancel_all();
        scheduler.schedule(Duration::ZERO, Box::new(|| panic!("task after cancel ran")));
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.advance(Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_thread_scheduler_runs_task() {
        let scheduler = ThreadScheduler::new();
        let (tx, rx) = mpsc::channel();
        scheduler.schedule(Duration::from_millis(5), Box::new(move || tx.send(()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        scheduler.cancel_all();
    }

    #[test]
    fn test_thread_scheduler_cancel_abandons_pending() {
        let scheduler = ThreadScheduler::new();
        let (tx, rx) = mpsc::channel::<()>();
        scheduler.schedule(Duration::from_secs(60), Box::new(move || tx.send(()).unwrap()));
        scheduler.cancel_all();
        // Sender dropped with the abandoned task
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
    }
}
