// Kbswitch Device Layer - udev backend
// USB device enumeration and hotplug subscription through libudev

#![cfg(feature = "native")]

use std::ffi::OsStr;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use super::enumerator::{DeviceEnumerator, EnumerationError};
use super::fingerprint::DeviceFingerprint;
use super::monitor::{DeviceEventSource, DeviceSubscription, MonitorError};

const USB_SUBSYSTEM: &str = "usb";
// Whole devices (and hubs), not their interfaces
const USB_DEVICE_DEVTYPE: &str = "usb_device";

fn os_str(value: Option<&OsStr>) -> Option<String> {
    value
        .and_then(|v| v.to_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Build a `USB\VID_xxxx&PID_yyyy\<instance>` path for a udev USB device
fn instance_path(device: &udev::Device) -> Option<String> {
    let vendor = os_str(device.property_value("ID_VENDOR_ID"))
        .or_else(|| os_str(device.attribute_value("idVendor")))?;
    let product = os_str(device.property_value("ID_MODEL_ID"))
        .or_else(|| os_str(device.attribute_value("idProduct")))?;

    let fingerprint = match DeviceFingerprint::parse(&vendor, &product) {
        Ok(fp) => fp,
        Err(e) => {
            log::debug!("Skipping {}: {}", device.syspath().display(), e);
            return None;
        }
    };

    let instance = os_str(device.property_value("ID_SERIAL_SHORT"))
        .unwrap_or_else(|| device.sysname().to_string_lossy().into_owned());
    Some(fingerprint.instance_path(&instance))
}

/// Enumerates attached USB devices from the udev database
#[derive(Debug, Default, Clone, Copy)]
pub struct UdevEnumerator;

impl UdevEnumerator {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceEnumerator for UdevEnumerator {
    fn enumerate(&self) -> Result<Vec<String>, EnumerationError> {
        let failed = |e: std::io::Error| EnumerationError::Failed(e.to_string());

        let mut enumerator = udev::Enumerator::new().map_err(failed)?;
        enumerator.match_subsystem(USB_SUBSYSTEM).map_err(failed)?;
        enumerator
            .match_property("DEVTYPE", USB_DEVICE_DEVTYPE)
            .map_err(failed)?;

        let paths = enumerator
            .scan_devices()
            .map_err(failed)?
            .filter_map(|device| instance_path(&device))
            .collect();
        Ok(paths)
    }
}

/// Hotplug notifications for USB devices and hubs
#[derive(Debug, Default, Clone, Copy)]
pub struct UdevEventSource;

impl UdevEventSource {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceEventSource for UdevEventSource {
    fn open(&self) -> Result<Box<dyn DeviceSubscription>, MonitorError> {
        let socket = udev::MonitorBuilder::new()
            .and_then(|builder| builder.match_subsystem_devtype(USB_SUBSYSTEM, USB_DEVICE_DEVTYPE))
            .and_then(|builder| builder.listen())
            .map_err(|e| MonitorError::SubscriptionSetupFailed(e.to_string()))?;
        Ok(Box::new(UdevSubscription { socket }))
    }
}

/// State of the monitor socket after one `poll`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Idle,
    Readable,
    /// Error or hangup without pending data; the socket will never recover
    Broken,
}

fn readiness(ret: libc::c_int, revents: libc::c_short) -> Readiness {
    if ret == 0 {
        Readiness::Idle
    } else if revents & libc::POLLIN != 0 {
        Readiness::Readable
    } else if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        Readiness::Broken
    } else {
        Readiness::Idle
    }
}

struct UdevSubscription {
    socket: udev::MonitorSocket,
}

impl DeviceSubscription for UdevSubscription {
    fn wait(&mut self, timeout: Duration) -> Result<bool, MonitorError> {
        let mut fds = [libc::pollfd {
            fd: self.socket.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(MonitorError::Subscription(err.to_string()));
        }
        match readiness(ret, fds[0].revents) {
            Readiness::Idle => return Ok(false),
            Readiness::Broken => {
                return Err(MonitorError::Subscription(format!(
                    "udev monitor socket reported revents {:#x}",
                    fds[0].revents
                )));
            }
            Readiness::Readable => {}
        }

        let mut notified = false;
        for event in self.socket.iter() {
            log::debug!(
                "udev {:?} event for {}",
                event.event_type(),
                event.device().syspath().display()
            );
            notified = true;
        }
        Ok(notified)
    }
}
