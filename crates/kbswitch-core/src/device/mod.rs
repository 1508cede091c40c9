// Kbswitch Device Layer
// Device fingerprints, bounded-time queries and change monitoring

mod enumerator;
mod fingerprint;
#[cfg(feature = "native")]
mod hotplug;
mod monitor;

pub use enumerator::{DeviceEnumerator, DeviceQuery, EnumerationError, QueryPolicy};
pub use fingerprint::{
    first_connected, ConnectionState, DeviceFingerprint, DeviceMapping, FingerprintError,
};
#[cfg(feature = "native")]
pub use hotplug::{UdevEnumerator, UdevEventSource};
pub use monitor::{
    DeviceEventSource, DeviceMonitor, DeviceSubscription, MonitorError, MonitorMode,
    MonitorSettings,
};
