// Kbswitch Coordinator - Evaluation Queue
// Coalescing single-slot queue between trigger sources and the worker

use parking_lot::{Condvar, Mutex};

use super::signals::Trigger;

#[derive(Debug, Default)]
struct QueueState {
    pending: Option<Trigger>,
    coalesced: u64,
    closed: bool,
}

/// Pending-evaluation flag shared by every trigger source.
///
/// Holds at most one pending request. A trigger that arrives while one
/// is already pending is folded into it: the pending pass has not
/// started yet, so it will observe the newer state anyway. A trigger
/// that arrives while a pass is running sets a fresh pending request,
/// which guarantees exactly one more pass afterwards.
#[derive(Debug, Default)]
pub struct EvaluationQueue {
    state: Mutex<QueueState>,
    cvar: Condvar,
}

impl EvaluationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an evaluation. Returns false if it was coalesced or the
    /// queue is closed.
    pub fn request(&self, trigger: Trigger) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        if let Some(pending) = state.pending {
            state.coalesced += 1;
            log::debug!("Trigger {} coalesced into pending {}", trigger, pending);
            return false;
        }
        state.pending = Some(trigger);
        drop(state);
        self.cvar.notify_one();
        true
    }

    /// Take the pending request without blocking
    pub fn take(&self) -> Option<Trigger> {
        self.state.lock().pending.take()
    }

    /// Block until a request is pending. Returns None once closed.
    pub fn wait(&self) -> Option<Trigger> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(trigger) = state.pending.take() {
                return Some(trigger);
            }
            self.cvar.wait(&mut state);
        }
    }

    /// Close the queue and wake the worker; pending requests are dropped
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending = None;
        drop(state);
        self.cvar.notify_all();
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Number of triggers folded into an already pending request
    pub fn coalesced(&self) -> u64 {
        self.state.lock().coalesced
    }
}
