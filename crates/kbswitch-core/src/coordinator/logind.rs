// Kbswitch Coordinator - logind Signals
// Sleep, lock and session activity from systemd-logind over the system bus

#![cfg(feature = "native")]

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use zbus::blocking::fdo::PropertiesProxy;
use zbus::blocking::{Connection, Proxy};
use zbus::zvariant::{OwnedObjectPath, Value};

use super::session::{lock_signal, sleep_signal, SessionActivity};
use super::signals::{SignalError, SignalHandler, SignalSource, SignalSubscription, SystemSignal};

const LOGIND_BUS_NAME: &str = "org.freedesktop.login1";
const LOGIND_MANAGER_PATH: &str = "/org/freedesktop/login1";
const LOGIND_MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";
const LOGIND_SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";

const READY_TIMEOUT: Duration = Duration::from_secs(5);

type Ready = Sender<Result<(), String>>;

/// Forwards signals until the subscription is cancelled
#[derive(Clone)]
struct Dispatch {
    handler: SignalHandler,
    stopped: Arc<AtomicBool>,
}

impl Dispatch {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn send(&self, signal: SystemSignal) {
        if self.is_stopped() {
            return;
        }
        log::debug!("[logind] {}", signal);
        (self.handler)(signal);
    }
}

/// Signal source backed by systemd-logind.
///
/// `PrepareForSleep` on the manager gives suspend/resume. When the
/// process belongs to a login session, that session's `Lock`/`Unlock`
/// signals and `Active` property add unlock and console/remote
/// connect transitions. Without a session only sleep is reported.
///
/// Listener threads block on the bus; after cancellation they exit on
/// their next message without dispatching it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogindSignals;

impl LogindSignals {
    pub fn new() -> Self {
        Self
    }
}

impl SignalSource for LogindSignals {
    fn subscribe(&self, handler: SignalHandler) -> Result<SignalSubscription, SignalError> {
        let connection = Connection::system().map_err(subscription_failed)?;
        let dispatch = Dispatch {
            handler,
            stopped: Arc::new(AtomicBool::new(false)),
        };
        let stopped = Arc::clone(&dispatch.stopped);
        let (ready_tx, ready_rx) = mpsc::channel();

        spawn_listener("kbswitch-logind-sleep", ready_tx.clone(), {
            let connection = connection.clone();
            let dispatch = dispatch.clone();
            move |ready| watch_sleep(connection, dispatch, ready)
        })?;
        if let Err(e) = await_ready(&ready_rx) {
            stopped.store(true, Ordering::SeqCst);
            return Err(SignalError::SubscriptionFailed(format!("PrepareForSleep: {}", e)));
        }

        match resolve_session_path(&connection) {
            Ok(session) => {
                log::info!("[logind] Watching session {}", session.as_str());
                let spawned = [
                    spawn_listener("kbswitch-logind-lock", ready_tx.clone(), {
                        let connection = connection.clone();
                        let session = session.clone();
                        let dispatch = dispatch.clone();
                        move |ready| watch_lock(connection, session, dispatch, ready)
                    }),
                    spawn_listener("kbswitch-logind-active", ready_tx, {
                        move |ready| watch_activity(connection, session, dispatch, ready)
                    }),
                ];
                for result in spawned {
                    if let Err(e) = result.and_then(|()| {
                        await_ready(&ready_rx).map_err(SignalError::SubscriptionFailed)
                    }) {
                        log::warn!("[logind] Session listener unavailable: {}", e);
                    }
                }
            }
            Err(e) => log::warn!("[logind] No login session ({}); watching sleep only", e),
        }

        Ok(SignalSubscription::new(move || {
            stopped.store(true, Ordering::SeqCst);
        }))
    }
}

fn subscription_failed(e: zbus::Error) -> SignalError {
    SignalError::SubscriptionFailed(e.to_string())
}

fn spawn_listener(
    name: &str,
    ready: Ready,
    listen: impl FnOnce(Ready) + Send + 'static,
) -> Result<(), SignalError> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || listen(ready))
        .map(|_| ())
        .map_err(|e| SignalError::SubscriptionFailed(e.to_string()))
}

fn await_ready(ready: &Receiver<Result<(), String>>) -> Result<(), String> {
    ready
        .recv_timeout(READY_TIMEOUT)
        .unwrap_or_else(|_| Err("listener did not start".to_string()))
}

/// Session named by `XDG_SESSION_ID`, else the one owning this process
fn resolve_session_path(connection: &Connection) -> zbus::Result<OwnedObjectPath> {
    let manager = Proxy::new(
        connection,
        LOGIND_BUS_NAME,
        LOGIND_MANAGER_PATH,
        LOGIND_MANAGER_INTERFACE,
    )?;
    match env::var("XDG_SESSION_ID") {
        Ok(id) if !id.is_empty() => manager.call("GetSession", &(id,)),
        _ => manager.call("GetSessionByPID", &(std::process::id(),)),
    }
}

fn watch_sleep(connection: Connection, dispatch: Dispatch, ready: Ready) {
    let proxy = match Proxy::new(
        &connection,
        LOGIND_BUS_NAME,
        LOGIND_MANAGER_PATH,
        LOGIND_MANAGER_INTERFACE,
    ) {
        Ok(proxy) => proxy,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let signals = match proxy.receive_signal("PrepareForSleep") {
        Ok(signals) => signals,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    for message in signals {
        if dispatch.is_stopped() {
            break;
        }
        match message.body::<(bool,)>() {
            Ok((preparing,)) => dispatch.send(sleep_signal(preparing)),
            Err(e) => log::warn!("[logind] Bad PrepareForSleep signal: {}", e),
        }
    }
    log::debug!("[logind] Sleep listener exiting");
}

fn watch_lock(connection: Connection, session: OwnedObjectPath, dispatch: Dispatch, ready: Ready) {
    let proxy = match Proxy::new(&connection, LOGIND_BUS_NAME, session, LOGIND_SESSION_INTERFACE) {
        Ok(proxy) => proxy,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let signals = match proxy.receive_all_signals() {
        Ok(signals) => signals,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    for message in signals {
        if dispatch.is_stopped() {
            break;
        }
        let member = message.member();
        if let Some(signal) = member.as_ref().and_then(|m| lock_signal(m.as_str())) {
            dispatch.send(signal);
        }
    }
    log::debug!("[logind] Lock listener exiting");
}

fn watch_activity(
    connection: Connection,
    session: OwnedObjectPath,
    dispatch: Dispatch,
    ready: Ready,
) {
    let initial = match Proxy::new(
        &connection,
        LOGIND_BUS_NAME,
        session.clone(),
        LOGIND_SESSION_INTERFACE,
    ) {
        Ok(proxy) => SessionActivity::new(
            proxy.get_property::<bool>("Active").unwrap_or(true),
            proxy.get_property::<bool>("Remote").unwrap_or(false),
        ),
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };

    let properties = match PropertiesProxy::builder(&connection)
        .destination(LOGIND_BUS_NAME)
        .and_then(|builder| builder.path(session))
        .and_then(|builder| builder.build())
    {
        Ok(properties) => properties,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let changes = match properties.receive_properties_changed() {
        Ok(changes) => changes,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut activity = initial;
    for change in changes {
        if dispatch.is_stopped() {
            break;
        }
        let args = match change.args() {
            Ok(args) => args,
            Err(e) => {
                log::warn!("[logind] Bad PropertiesChanged signal: {}", e);
                continue;
            }
        };
        if let Some(Value::Bool(active)) = args.changed_properties.get("Active") {
            if let Some(signal) = activity.update(*active) {
                dispatch.send(signal);
            }
        }
    }
    log::debug!("[logind] Activity listener exiting");
}
