// Kbswitch Coordinator - Notifications
// Events emitted to the presentation layer

use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::Mutex;

/// Events for the presentation layer (tray, balloons, log viewer)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A layout was activated
    LayoutChanged {
        layout_name: String,
        /// True when the layout comes from a connected device mapping
        via_external_device: bool,
        /// True only for the startup evaluation
        is_initial: bool,
    },
    /// Configured device presence changed
    DeviceStatusChanged {
        connected: bool,
        device_name: Option<String>,
    },
}

/// Receiver of engine notifications
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Forwards notifications into an mpsc channel
pub struct ChannelSink {
    tx: Mutex<Sender<Notification>>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<Notification>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: Notification) {
        // A dropped receiver just means nobody is listening
        let _ = self.tx.lock().send(notification);
    }
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::LayoutChanged {
                layout_name,
                via_external_device,
                is_initial,
            } => {
                let source = if via_external_device {
                    "external keyboard"
                } else {
                    "default"
                };
                if is_initial {
                    log::info!("Initial layout: {} ({})", layout_name, source);
                } else {
                    log::info!("Layout changed to {} ({})", layout_name, source);
                }
            }
            Notification::DeviceStatusChanged {
                connected,
                device_name,
            } => {
                let name = device_name.as_deref().unwrap_or("configured keyboard");
                if connected {
                    log::info!("{} connected", name);
                } else {
                    log::info!("{} disconnected", name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_delivers() {
        let (sink, rx) = ChannelSink::new();
        sink.notify(Notification::DeviceStatusChanged {
            connected: true,
            device_name: Some("Kinesis".to_string()),
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::DeviceStatusChanged {
                connected: true,
                device_name: Some("Kinesis".to_string()),
            }
        );
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.notify(Notification::LayoutChanged {
            layout_name: "US".to_string(),
            via_external_device: false,
            is_initial: true,
        });
    }

    #[test]
    fn test_log_sink_accepts_all_variants() {
        LogSink.notify(Notification::LayoutChanged {
            layout_name: "US".to_string(),
            via_external_device: true,
            is_initial: false,
        });
        LogSink.notify(Notification::DeviceStatusChanged {
            connected: false,
            device_name: None,
        });
    }
}
