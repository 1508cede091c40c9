// Kbswitch Device Layer - Enumeration
// Bounded-time device queries with a single retry and a fail-safe result

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::fingerprint::{first_connected, ConnectionState, DeviceFingerprint, DeviceMapping};
use crate::shutdown::Shutdown;

/// Errors from one device enumeration attempt
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnumerationError {
    #[error("Device enumeration timed out after {0:?}")]
    Timeout(Duration),

    #[error("Device enumeration failed: {0}")]
    Failed(String),
}

/// Source of OS device instance paths (e.g. `USB\VID_1E54&PID_2030\...`)
///
/// Implementations may block; callers bound them with a timeout.
pub trait DeviceEnumerator: Send + Sync {
    /// List the instance paths of the currently attached USB devices
    fn enumerate(&self) -> Result<Vec<String>, EnumerationError>;
}

/// Timeout and retry policy for device queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPolicy {
    /// Upper bound for one enumeration attempt
    pub timeout: Duration,
    /// Pause before the single retry
    pub retry_delay: Duration,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Point-in-time device queries.
///
/// Each attempt runs on a helper thread so a hung enumeration service
/// cannot stall the caller past `QueryPolicy::timeout`. A failed attempt
/// is retried once; if the retry fails too, the query reports
/// "not connected" and logs a warning instead of returning an error.
#[derive(Clone)]
pub struct DeviceQuery {
    enumerator: Arc<dyn DeviceEnumerator>,
    policy: QueryPolicy,
    shutdown: Arc<Shutdown>,
}

impl DeviceQuery {
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        Self {
            enumerator,
            policy: QueryPolicy::default(),
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub fn with_policy(mut self, policy: QueryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Abandon the retry pause once `shutdown` is triggered
    pub fn with_shutdown(mut self, shutdown: Arc<Shutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn policy(&self) -> QueryPolicy {
        self.policy
    }

    fn enumerate_once(&self) -> Result<Vec<String>, EnumerationError> {
        let (tx, rx) = mpsc::channel();
        let enumerator = Arc::clone(&self.enumerator);

        // A hung attempt keeps its thread; the receiver is simply dropped
        thread::Builder::new()
            .name("kbswitch-enum".to_string())
            .spawn(move || {
                let _ = tx.send(enumerator.enumerate());
            })
            .map_err(|e| EnumerationError::Failed(e.to_string()))?;

        match rx.recv_timeout(self.policy.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(EnumerationError::Timeout(self.policy.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(EnumerationError::Failed(
                "enumeration thread exited without a result".to_string(),
            )),
        }
    }

    /// Enumerate with one retry, surfacing the final error
    pub fn try_enumerate(&self) -> Result<Vec<String>, EnumerationError> {
        match self.enumerate_once() {
            Ok(paths) => Ok(paths),
            Err(first) => {
                log::debug!("{}; retrying in {:?}", first, self.policy.retry_delay);
                if self.shutdown.wait_timeout(self.policy.retry_delay) {
                    log::debug!("Shutting down, skipping enumeration retry");
                    return Err(first);
                }
                self.enumerate_once()
            }
        }
    }

    /// Enumerate with retry, returning no devices when both attempts fail
    pub fn instance_paths(&self) -> Vec<String> {
        match self.try_enumerate() {
            Ok(paths) => paths,
            Err(e) => {
                log::warn!("{} after retry; treating devices as not connected", e);
                Vec::new()
            }
        }
    }

    /// Whether a device with this fingerprint is attached right now
    pub fn is_connected(&self, fingerprint: &DeviceFingerprint) -> bool {
        self.instance_paths()
            .iter()
            .any(|path| fingerprint.matches_path(path))
    }

    /// First mapping, in configured order, whose device is attached
    pub fn connected_mapping(&self, mappings: &[DeviceMapping]) -> Option<DeviceMapping> {
        if mappings.is_empty() {
            return None;
        }
        let paths = self.instance_paths();
        first_connected(mappings, &paths).cloned()
    }

    /// Current connection state for a set of mappings
    pub fn connection_state(&self, mappings: &[DeviceMapping]) -> ConnectionState {
        ConnectionState::from(self.connected_mapping(mappings))
    }

    /// Attached devices with their parsed fingerprints, for diagnostics.
    ///
    /// Unlike the presence queries this surfaces enumeration errors.
    pub fn list_devices(&self) -> Result<Vec<(String, Option<DeviceFingerprint>)>, EnumerationError> {
        let mut paths = self.try_enumerate()?;
        paths.sort();
        paths.dedup();
        Ok(paths
            .into_iter()
            .map(|path| {
                let fingerprint = DeviceFingerprint::from_instance_path(&path);
                (path, fingerprint)
            })
            .collect())
    }
}
