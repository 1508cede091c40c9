// Kbswitch Core Library
// Device-driven keyboard layout switching engine

pub mod activator;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod layout;
pub mod shutdown;

pub use activator::{
    ActivationError, BackendError, LayoutActivator, LayoutBackend, XkbBackend, XkbLayout,
};
pub use config::{Config, ConfigError};
pub use coordinator::{
    ChannelSink, EvaluationOutcome, FirstAvailable, LogSink, ManualScheduler, Notification,
    NotificationSink, Scheduler, SignalDelays, SignalSource, SuspendDetector, SwitchConfig,
    SwitchState, SwitchingCoordinator, SystemSignal, ThreadScheduler, Trigger,
};
pub use device::{
    ConnectionState, DeviceEnumerator, DeviceEventSource, DeviceFingerprint, DeviceMapping,
    DeviceMonitor, DeviceQuery, EnumerationError, MonitorError, MonitorMode, MonitorSettings,
    QueryPolicy,
};
pub use layout::{
    resolve, InstalledLayout, LanguageFallback, LayoutCatalog, LayoutDescriptor, LayoutId,
};
pub use shutdown::Shutdown;

#[cfg(feature = "native")]
pub use coordinator::LogindSignals;
#[cfg(feature = "native")]
pub use device::{UdevEnumerator, UdevEventSource};
