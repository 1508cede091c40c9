// Kbswitch Shutdown Signal
// Wakeable stop flag shared by background workers

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One-shot stop flag that sleeping workers can wait on.
///
/// Workers call `wait_timeout` instead of `thread::sleep` so a shutdown
/// wakes them immediately.
#[derive(Debug, Default)]
pub struct Shutdown {
    triggered: Mutex<bool>,
    cvar: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter
    pub fn trigger(&self) {
        *self.triggered.lock() = true;
        self.cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.triggered.lock()
    }

    /// Sleep for up to `timeout`. Returns true if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.triggered.lock();
        while !*triggered {
            if self.cvar.wait_until(&mut triggered, deadline).timed_out() {
                break;
            }
        }
        *triggered
    }
}
