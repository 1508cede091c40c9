// Kbswitch Coordinator - Session Transitions
// Maps logind sleep, lock and activity changes to system signals

use super::signals::SystemSignal;

/// `PrepareForSleep(true)` precedes sleep, `PrepareForSleep(false)` follows wake-up
pub fn sleep_signal(preparing: bool) -> SystemSignal {
    if preparing {
        SystemSignal::Suspend
    } else {
        SystemSignal::Resume
    }
}

/// Session `Lock`/`Unlock` signal members
pub fn lock_signal(member: &str) -> Option<SystemSignal> {
    match member {
        "Lock" => Some(SystemSignal::SessionLock),
        "Unlock" => Some(SystemSignal::SessionUnlock),
        _ => None,
    }
}

/// Last seen `Active` state of our session.
///
/// A session gaining the seat is a console or remote connect, depending
/// on whether logind reports it as remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionActivity {
    active: bool,
    remote: bool,
}

impl SessionActivity {
    pub fn new(active: bool, remote: bool) -> Self {
        Self { active, remote }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Record a new `Active` value; None if it did not change
    pub fn update(&mut self, active: bool) -> Option<SystemSignal> {
        if active == self.active {
            return None;
        }
        self.active = active;
        Some(match (active, self.remote) {
            (true, true) => SystemSignal::RemoteConnect,
            (true, false) => SystemSignal::ConsoleConnect,
            (false, true) => SystemSignal::RemoteDisconnect,
            (false, false) => SystemSignal::ConsoleDisconnect,
        })
    }
}
