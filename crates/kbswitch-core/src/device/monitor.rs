// Kbswitch Device Layer - Monitor
// Change notifications for configured devices, event-driven with a polling fallback

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use strum_macros::{Display, IntoStaticStr};

use super::enumerator::DeviceQuery;
use super::fingerprint::{ConnectionState, DeviceFingerprint, DeviceMapping};
use crate::shutdown::Shutdown;

/// Errors from the OS device event subscription
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    #[error("Device event subscription could not be set up: {0}")]
    SubscriptionSetupFailed(String),

    #[error("Device event subscription failed: {0}")]
    Subscription(String),
}

/// An open OS device event subscription.
///
/// Created and dropped on the monitor's worker thread, so native
/// watcher resources never outlive one monitoring session.
pub trait DeviceSubscription {
    /// Block until the next raw device notification or `timeout`.
    ///
    /// Returns Ok(true) if at least one notification arrived.
    fn wait(&mut self, timeout: Duration) -> Result<bool, MonitorError>;
}

/// Factory for OS device event subscriptions
pub trait DeviceEventSource: Send + Sync {
    fn open(&self) -> Result<Box<dyn DeviceSubscription>, MonitorError>;
}

/// How the monitor is currently observing devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum MonitorMode {
    Stopped,
    /// Setting up the event subscription
    Starting,
    /// OS event subscription active
    EventDriven,
    /// Subscription unavailable; re-querying on a fixed interval
    Polling,
}

/// Monitor timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Interval between polls in polling mode
    pub poll_interval: Duration,
    /// Upper bound for one subscription wait, bounds stop latency
    pub event_wait: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            event_wait: Duration::from_millis(250),
        }
    }
}

struct Shared {
    query: DeviceQuery,
    mappings: RwLock<Arc<Vec<DeviceMapping>>>,
    last: Mutex<Option<ConnectionState>>,
    subscribers: Mutex<Vec<Sender<ConnectionState>>>,
    mode: Mutex<MonitorMode>,
    settings: MonitorSettings,
}

impl Shared {
    fn current_state(&self) -> ConnectionState {
        let mappings = Arc::clone(&*self.mappings.read());
        self.query.connection_state(&mappings)
    }

    fn prime(&self) {
        let state = self.current_state();
        *self.last.lock() = Some(state);
    }

    /// Re-query and emit if the state differs from the last emitted one
    fn refresh(&self) -> Option<ConnectionState> {
        let state = self.current_state();
        {
            let mut last = self.last.lock();
            if last.as_ref() == Some(&state) {
                return None;
            }
            *last = Some(state.clone());
        }

        log::info!(
            "Device state changed: connected={} device={:?}",
            state.connected,
            state.device_name()
        );
        self.subscribers
            .lock()
            .retain(|tx| tx.send(state.clone()).is_ok());
        Some(state)
    }

    fn set_mode(&self, mode: MonitorMode) {
        *self.mode.lock() = mode;
    }
}

struct Worker {
    shutdown: Arc<Shutdown>,
    handle: JoinHandle<()>,
}

/// Watches for attach/detach of the configured devices.
///
/// `start()` tries the OS event subscription first and falls back to
/// polling when it cannot be set up. Falling back is one-way for the
/// rest of the session; `stop()` ends the session.
pub struct DeviceMonitor {
    shared: Arc<Shared>,
    source: Option<Arc<dyn DeviceEventSource>>,
    worker: Mutex<Option<Worker>>,
}

impl DeviceMonitor {
    /// Create a monitor. Without an event source it always polls.
    pub fn new(
        query: DeviceQuery,
        source: Option<Arc<dyn DeviceEventSource>>,
        mappings: Vec<DeviceMapping>,
    ) -> Self {
        Self::with_settings(query, source, mappings, MonitorSettings::default())
    }

    pub fn with_settings(
        query: DeviceQuery,
        source: Option<Arc<dyn DeviceEventSource>>,
        mappings: Vec<DeviceMapping>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                query,
                mappings: RwLock::new(Arc::new(mappings)),
                last: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
                mode: Mutex::new(MonitorMode::Stopped),
                settings,
            }),
            source,
            worker: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> MonitorMode {
        *self.shared.mode.lock()
    }

    /// Point-in-time query for one device
    pub fn is_connected(&self, fingerprint: &DeviceFingerprint) -> bool {
        self.shared.query.is_connected(fingerprint)
    }

    /// First mapping, in configured order, whose device is attached
    pub fn connected_mapping(&self, mappings: &[DeviceMapping]) -> Option<DeviceMapping> {
        self.shared.query.connected_mapping(mappings)
    }

    pub fn query(&self) -> &DeviceQuery {
        &self.shared.query
    }

    /// Replace the watched mappings (configuration reload)
    pub fn set_mappings(&self, mappings: Vec<DeviceMapping>) {
        *self.shared.mappings.write() = Arc::new(mappings);
    }

    /// Receive a `ConnectionState` every time device presence changes
    pub fn subscribe(&self) -> Receiver<ConnectionState> {
        let (tx, rx) = mpsc::channel();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Re-query now and notify subscribers if the state changed
    pub fn poll_once(&self) -> Option<ConnectionState> {
        self.shared.refresh()
    }

    /// Start monitoring and return the mode that was established.
    ///
    /// Blocks until the subscription is set up (or has failed) and the
    /// baseline state is recorded. Calling it while running is a no-op.
    pub fn start(&self) -> MonitorMode {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return self.mode();
        }

        self.shared.set_mode(MonitorMode::Starting);
        let shutdown = Arc::new(Shutdown::new());
        let (ready_tx, ready_rx) = mpsc::channel();

        let shared = Arc::clone(&self.shared);
        let source = self.source.clone();
        let worker_shutdown = Arc::clone(&shutdown);
        let spawned = thread::Builder::new()
            .name("kbswitch-monitor".to_string())
            .spawn(move || run_session(shared, source, worker_shutdown, ready_tx));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Failed to spawn device monitor thread: {}", e);
                self.shared.set_mode(MonitorMode::Stopped);
                return MonitorMode::Stopped;
            }
        };

        let mode = ready_rx.recv().unwrap_or(MonitorMode::Stopped);
        log::info!("Device monitor started in {} mode", mode);
        *worker = Some(Worker { shutdown, handle });
        mode
    }

    /// Stop monitoring. Safe to call repeatedly or without `start()`.
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.shutdown.trigger();
            if worker.handle.join().is_err() {
                log::error!("Device monitor thread panicked");
            }
            log::info!("Device monitor stopped");
        }
        *self.shared.last.lock() = None;
        self.shared.set_mode(MonitorMode::Stopped);
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_session(
    shared: Arc<Shared>,
    source: Option<Arc<dyn DeviceEventSource>>,
    shutdown: Arc<Shutdown>,
    ready: Sender<MonitorMode>,
) {
    let subscription = match source {
        Some(source) => source.open(),
        None => Err(MonitorError::SubscriptionSetupFailed(
            "no device event source".to_string(),
        )),
    };

    match subscription {
        Ok(mut subscription) => {
            shared.prime();
            shared.set_mode(MonitorMode::EventDriven);
            let _ = ready.send(MonitorMode::EventDriven);

            match run_event_loop(&shared, subscription.as_mut(), &shutdown) {
                Ok(()) => return,
                Err(e) => {
                    log::warn!("{}; falling back to polling", e);
                }
            }
            // Release the native watcher before polling
            drop(subscription);
            shared.set_mode(MonitorMode::Polling);
            shared.refresh();
        }
        Err(e) => {
            log::warn!("{}; falling back to polling", e);
            shared.prime();
            shared.set_mode(MonitorMode::Polling);
            let _ = ready.send(MonitorMode::Polling);
        }
    }

    run_poll_loop(&shared, &shutdown);
}

fn run_event_loop(
    shared: &Shared,
    subscription: &mut dyn DeviceSubscription,
    shutdown: &Shutdown,
) -> Result<(), MonitorError> {
    while !shutdown.is_triggered() {
        if subscription.wait(shared.settings.event_wait)? {
            shared.refresh();
        }
    }
    Ok(())
}

fn run_poll_loop(shared: &Shared, shutdown: &Shutdown) {
    log::debug!("Polling devices every {:?}", shared.settings.poll_interval);
    while !shutdown.wait_timeout(shared.settings.poll_interval) {
        shared.refresh();
    }
}
