// Kbswitch Coordinator - Switching Engine
// Decides the desired layout and applies it once per relevant change

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::notify::{Notification, NotificationSink};
use super::queue::EvaluationQueue;
use super::scheduler::Scheduler;
use super::signals::{
    SignalDelays, SignalHandler, SignalSource, SignalSubscription, SystemSignal, Trigger,
};
use crate::activator::{ActivationError, LayoutActivator};
use crate::device::{ConnectionState, DeviceMapping, DeviceMonitor, MonitorMode};
use crate::layout::{InstalledLayout, LayoutCatalog, LayoutId};
use crate::shutdown::Shutdown;

const FORWARD_WAIT: Duration = Duration::from_millis(250);

/// Immutable configuration snapshot, replaced wholesale on reload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchConfig {
    /// Layout used when no configured device is attached
    pub default_layout: LayoutId,
    /// Device mappings in priority order
    pub mappings: Vec<DeviceMapping>,
    pub catalog: LayoutCatalog,
    pub delays: SignalDelays,
}

impl SwitchConfig {
    pub fn new(default_layout: LayoutId, mappings: Vec<DeviceMapping>) -> Self {
        Self {
            default_layout,
            mappings,
            catalog: LayoutCatalog::builtin(),
            delays: SignalDelays::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: LayoutCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_delays(mut self, delays: SignalDelays) -> Self {
        self.delays = delays;
        self
    }

    /// Layout to apply given the connected mapping, if any
    pub fn desired_layout(&self, connected: Option<&DeviceMapping>) -> LayoutId {
        connected
            .map(|mapping| mapping.layout)
            .unwrap_or(self.default_layout)
    }
}

/// Mutable engine state, guarded by the evaluation lock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchState {
    /// Last layout successfully applied by this process
    pub last_applied: Option<LayoutId>,
    pub evaluations: u64,
    pub activations: u64,
}

/// Result of one evaluation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// Desired layout already applied; nothing was done
    Unchanged(LayoutId),
    /// `layout` was requested and `resolved` activated
    Applied { layout: LayoutId, resolved: LayoutId },
    Failed(ActivationError),
}

#[derive(Default)]
struct Runtime {
    worker: Option<JoinHandle<()>>,
    forwarder: Option<(Arc<Shutdown>, JoinHandle<()>)>,
    subscriptions: Vec<SignalSubscription>,
}

/// Keeps the active layout in sync with the configured devices.
///
/// Every trigger funnels into one `EvaluationQueue` drained by a single
/// worker, so evaluation passes never overlap. Delayed triggers (resume,
/// unlock) go through the injected `Scheduler`.
pub struct SwitchingCoordinator {
    config: RwLock<Arc<SwitchConfig>>,
    monitor: Arc<DeviceMonitor>,
    activator: LayoutActivator,
    sink: Arc<dyn NotificationSink>,
    scheduler: Arc<dyn Scheduler>,
    queue: Arc<EvaluationQueue>,
    state: Mutex<SwitchState>,
    initialized: AtomicBool,
    runtime: Mutex<Runtime>,
}

impl SwitchingCoordinator {
    pub fn new(
        config: SwitchConfig,
        monitor: Arc<DeviceMonitor>,
        activator: LayoutActivator,
        sink: Arc<dyn NotificationSink>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        monitor.set_mappings(config.mappings.clone());
        Self {
            config: RwLock::new(Arc::new(config)),
            monitor,
            activator,
            sink,
            scheduler,
            queue: Arc::new(EvaluationQueue::new()),
            state: Mutex::new(SwitchState::default()),
            initialized: AtomicBool::new(false),
            runtime: Mutex::new(Runtime::default()),
        }
    }

    pub fn config(&self) -> Arc<SwitchConfig> {
        Arc::clone(&*self.config.read())
    }

    pub fn monitor(&self) -> &Arc<DeviceMonitor> {
        &self.monitor
    }

    pub fn activator(&self) -> &LayoutActivator {
        &self.activator
    }

    pub fn queue(&self) -> &EvaluationQueue {
        &self.queue
    }

    pub fn state(&self) -> SwitchState {
        self.state.lock().clone()
    }

    pub fn last_applied(&self) -> Option<LayoutId> {
        self.state.lock().last_applied
    }

    /// Run one evaluation pass now, on the caller's thread.
    ///
    /// Passes are serialized by the state lock. `Trigger::Initial` marks
    /// the resulting notification as the startup one.
    pub fn evaluate(&self, trigger: Trigger) -> EvaluationOutcome {
        let mut state = self.state.lock();
        state.evaluations += 1;

        let config = self.config();
        let connected = self.monitor.connected_mapping(&config.mappings);
        let desired = config.desired_layout(connected.as_ref());

        if state.last_applied == Some(desired) {
            log::debug!("Evaluation ({}): {} already applied", trigger, desired);
            return EvaluationOutcome::Unchanged(desired);
        }

        let resolved = match self
            .activator
            .activate(desired, config.catalog.fallback_for(desired))
        {
            Ok(resolved) => resolved,
            Err(e) => {
                log::warn!("Evaluation ({}): {}", trigger, e);
                return EvaluationOutcome::Failed(e);
            }
        };

        state.last_applied = Some(desired);
        state.activations += 1;
        log::info!(
            "Evaluation ({}): applied {} for {}",
            trigger,
            resolved.id,
            connected
                .as_ref()
                .map(|m| m.name.as_str())
                .unwrap_or("default layout")
        );

        // Still under the state lock so notifications keep pass order
        self.sink.notify(Notification::LayoutChanged {
            layout_name: layout_name(&config.catalog, desired, &resolved),
            via_external_device: connected.is_some(),
            is_initial: trigger == Trigger::Initial,
        });

        EvaluationOutcome::Applied {
            layout: desired,
            resolved: resolved.id,
        }
    }

    /// Evaluation with panics contained; used by every queued trigger
    fn run_pass(&self, trigger: Trigger) -> Option<EvaluationOutcome> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.evaluate(trigger))) {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                log::error!("Evaluation ({}) panicked", trigger);
                None
            }
        }
    }

    /// Run the startup evaluation. Only the first call has any effect.
    pub fn initialize(&self) -> Option<EvaluationOutcome> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.run_pass(Trigger::Initial)
    }

    /// Device presence changed: notify and request an immediate pass
    pub fn on_device_change(&self, state: ConnectionState) {
        self.sink.notify(Notification::DeviceStatusChanged {
            connected: state.connected,
            device_name: state.device_name().map(str::to_string),
        });
        self.queue.request(Trigger::DeviceChange);
    }

    /// OS power/session transition. Never blocks the delivering thread.
    pub fn on_signal(&self, signal: SystemSignal) {
        let Some(trigger) = signal.trigger() else {
            log::debug!("Ignoring signal {}", signal);
            return;
        };

        let delay = self.config().delays.delay_for(trigger);
        log::debug!("Signal {}: evaluating in {:?}", signal, delay);
        let queue = Arc::clone(&self.queue);
        self.scheduler.schedule(
            delay,
            Box::new(move || {
                queue.request(trigger);
            }),
        );
    }

    /// Swap in a new configuration snapshot and re-evaluate
    pub fn reload(&self, config: SwitchConfig) {
        self.monitor.set_mappings(config.mappings.clone());
        *self.config.write() = Arc::new(config);
        self.activator.invalidate_cache();
        log::info!("Configuration reloaded");
        self.queue.request(Trigger::ConfigReload);
    }

    /// Drain the pending request on the caller's thread.
    ///
    /// Returns the number of passes run.
    pub fn run_pending(&self) -> usize {
        let mut passes = 0;
        while let Some(trigger) = self.queue.take() {
            self.run_pass(trigger);
            passes += 1;
        }
        passes
    }

    /// Initial evaluation, then monitoring, signals and the worker.
    ///
    /// Returns the mode the device monitor came up in.
    pub fn start(self: &Arc<Self>, signals: &[Arc<dyn SignalSource>]) -> MonitorMode {
        self.initialize();

        let mut runtime = self.runtime.lock();
        if runtime.worker.is_some() {
            return self.monitor.mode();
        }

        let changes = self.monitor.subscribe();
        let mode = self.monitor.start();
        // The monitor's baseline is silent; catch devices attached since the initial pass
        self.queue.request(Trigger::DeviceChange);

        let stop = Arc::new(Shutdown::new());
        let weak = Arc::downgrade(self);
        let forwarder_stop = Arc::clone(&stop);
        match thread::Builder::new()
            .name("kbswitch-devices".to_string())
            .spawn(move || loop {
                if forwarder_stop.is_triggered() {
                    break;
                }
                match changes.recv_timeout(FORWARD_WAIT) {
                    Ok(state) => match weak.upgrade() {
                        Some(coordinator) => coordinator.on_device_change(state),
                        None => break,
                    },
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }) {
            Ok(handle) => runtime.forwarder = Some((stop, handle)),
            Err(e) => log::error!("Failed to spawn device forwarder: {}", e),
        }

        for source in signals {
            let weak: Weak<Self> = Arc::downgrade(self);
            let handler: SignalHandler = Arc::new(move |signal| {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.on_signal(signal);
                }
            });
            match source.subscribe(handler) {
                Ok(subscription) => runtime.subscriptions.push(subscription),
                Err(e) => log::warn!("{}; continuing without it", e),
            }
        }

        let queue = Arc::clone(&self.queue);
        let weak = Arc::downgrade(self);
        match thread::Builder::new()
            .name("kbswitch-worker".to_string())
            .spawn(move || {
                while let Some(trigger) = queue.wait() {
                    match weak.upgrade() {
                        Some(coordinator) => {
                            coordinator.run_pass(trigger);
                        }
                        None => break,
                    }
                }
                log::debug!("Evaluation worker exiting");
            }) {
            Ok(handle) => runtime.worker = Some(handle),
            Err(e) => log::error!("Failed to spawn evaluation worker: {}", e),
        }

        mode
    }

    /// Stop everything `start` set up. Safe to call repeatedly.
    pub fn shutdown(&self) {
        self.monitor.stop();

        let mut runtime = std::mem::take(&mut *self.runtime.lock());
        if let Some((stop, handle)) = runtime.forwarder.take() {
            stop.trigger();
            join_unless_current(handle, "device forwarder");
        }
        for subscription in runtime.subscriptions.drain(..) {
            subscription.cancel();
        }

        self.scheduler.cancel_all();
        self.queue.close();
        if let Some(handle) = runtime.worker.take() {
            join_unless_current(handle, "evaluation worker");
        }
        log::info!("Switching coordinator stopped");
    }
}

fn join_unless_current(handle: JoinHandle<()>, what: &str) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        log::error!("{} thread panicked", what);
    }
}

/// Name shown for an activation: catalog entry of the layout actually
/// activated, else the OS name, else the requested layout's name
fn layout_name(catalog: &LayoutCatalog, desired: LayoutId, resolved: &InstalledLayout) -> String {
    catalog
        .descriptor(resolved.id)
        .map(|d| d.display_name.clone())
        .or_else(|| resolved.name.clone())
        .unwrap_or_else(|| catalog.display_name(desired))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceFingerprint;
    use crate::layout::LayoutDescriptor;

    const US: LayoutId = LayoutId(0x0409_0409);
    const US_DVORAK: LayoutId = LayoutId(0xF002_0409);

    #[test]
    fn test_desired_layout() {
        let kinesis = DeviceMapping::new("Kinesis", DeviceFingerprint::new(0x1E54, 0x2030), US_DVORAK);
        let config = SwitchConfig::new(US, vec![kinesis.clone()]);
        assert_eq!(config.desired_layout(None), US);
        assert_eq!(config.desired_layout(Some(&kinesis)), US_DVORAK);
    }

    #[test]
    fn test_layout_name_prefers_activated_entry() {
        let catalog = LayoutCatalog::new(vec![LayoutDescriptor::new("en-US", US, "English (US)")]);

        let exact = InstalledLayout::new(US).with_name("us");
        assert_eq!(layout_name(&catalog, US, &exact), "English (US)");

        let os_named = InstalledLayout::new(US_DVORAK).with_name("English (Dvorak)");
        assert_eq!(layout_name(&catalog, US_DVORAK, &os_named), "English (Dvorak)");

        let unnamed = InstalledLayout::new(US_DVORAK);
        assert_eq!(layout_name(&catalog, US_DVORAK, &unnamed), "F0020409");
    }

    #[test]
    fn test_builder_sets_delays() {
        let delays = SignalDelays {
            resume: Duration::from_millis(10),
            unlock: Duration::from_millis(1),
        };
        let config = SwitchConfig::new(US, Vec::new()).with_delays(delays);
        assert_eq!(config.delays, delays);
        assert!(!config.catalog.is_empty());
    }
}
