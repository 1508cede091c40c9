// Kbswitch Coordinator
// Triggers, signal sources, the evaluation queue and the switching engine

mod engine;
mod logind;
mod notify;
mod queue;
mod scheduler;
mod session;
mod signals;
mod suspend;

pub use engine::{EvaluationOutcome, SwitchConfig, SwitchState, SwitchingCoordinator};
pub use notify::{ChannelSink, LogSink, Notification, NotificationSink};
pub use queue::EvaluationQueue;
pub use scheduler::{ManualScheduler, Scheduler, Task, ThreadScheduler};
pub use session::{lock_signal, sleep_signal, SessionActivity};
pub use signals::{
    FirstAvailable, SignalDelays, SignalError, SignalHandler, SignalSource, SignalSubscription,
    SystemSignal, Trigger,
};
pub use suspend::{detect_gap, SuspendDetector};

#[cfg(feature = "native")]
pub use logind::LogindSignals;
