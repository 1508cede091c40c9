// Kbswitch Coordinator - OS Signals
// Power/session transitions and the evaluation triggers they map to

use std::sync::Arc;
use std::time::Duration;

use strum_macros::{Display, EnumString};

/// Power and session transitions reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum SystemSignal {
    Suspend,
    Resume,
    SessionLock,
    SessionUnlock,
    RemoteConnect,
    RemoteDisconnect,
    ConsoleConnect,
    ConsoleDisconnect,
    SessionLogon,
    SessionLogoff,
}

impl SystemSignal {
    /// The evaluation this signal asks for, if any.
    ///
    /// Lock, logon/logoff, suspend and disconnects do not re-evaluate.
    pub fn trigger(self) -> Option<Trigger> {
        match self {
            SystemSignal::Resume => Some(Trigger::Resume),
            SystemSignal::SessionUnlock => Some(Trigger::SessionUnlock),
            SystemSignal::RemoteConnect => Some(Trigger::RemoteConnect),
            SystemSignal::ConsoleConnect => Some(Trigger::ConsoleConnect),
            SystemSignal::Suspend
            | SystemSignal::SessionLock
            | SystemSignal::RemoteDisconnect
            | SystemSignal::ConsoleDisconnect
            | SystemSignal::SessionLogon
            | SystemSignal::SessionLogoff => None,
        }
    }
}

/// Why an evaluation pass was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Trigger {
    Initial,
    DeviceChange,
    Resume,
    SessionUnlock,
    RemoteConnect,
    ConsoleConnect,
    ConfigReload,
}

/// Settle time after disruptive transitions before re-evaluating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalDelays {
    /// Wait after resume so USB devices re-enumerate
    pub resume: Duration,
    /// Wait after unlock/reconnect so the session input stack settles
    pub unlock: Duration,
}

impl Default for SignalDelays {
    fn default() -> Self {
        Self {
            resume: Duration::from_millis(2000),
            unlock: Duration::from_millis(500),
        }
    }
}

impl SignalDelays {
    pub fn delay_for(&self, trigger: Trigger) -> Duration {
        match trigger {
            Trigger::Resume => self.resume,
            Trigger::SessionUnlock | Trigger::RemoteConnect | Trigger::ConsoleConnect => {
                self.unlock
            }
            Trigger::Initial | Trigger::DeviceChange | Trigger::ConfigReload => Duration::ZERO,
        }
    }
}

/// Callback invoked on the delivering thread for every signal
pub type SignalHandler = Arc<dyn Fn(SystemSignal) + Send + Sync>;

/// Error subscribing to OS signals
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("Signal subscription failed: {0}")]
    SubscriptionFailed(String),
}

/// Live signal subscription; dropping it unsubscribes
pub struct SignalSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SignalSubscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription with nothing to release
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SignalSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Source of power/session signals
pub trait SignalSource: Send + Sync {
    fn subscribe(&self, handler: SignalHandler) -> Result<SignalSubscription, SignalError>;
}

/// Subscribes to the first source that accepts, trying them in order
pub struct FirstAvailable {
    sources: Vec<Arc<dyn SignalSource>>,
}

impl FirstAvailable {
    pub fn new(sources: Vec<Arc<dyn SignalSource>>) -> Self {
        Self { sources }
    }
}

impl SignalSource for FirstAvailable {
    fn subscribe(&self, handler: SignalHandler) -> Result<SignalSubscription, SignalError> {
        let mut last_error = SignalError::SubscriptionFailed("no signal sources".to_string());
        for source in &self.sources {
            match source.subscribe(Arc::clone(&handler)) {
                Ok(subscription) => return Ok(subscription),
                Err(e) => {
                    log::warn!("{}; trying the next signal source", e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}
