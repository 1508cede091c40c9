// Kbswitch Coordinator - Suspend Detector
// Resume detection from wall-clock jumps, for hosts without a session bus

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use super::signals::{
    SignalError, SignalHandler, SignalSource, SignalSubscription, SystemSignal,
};
use crate::shutdown::Shutdown;

/// Whether a wall-clock interval outran the monotonic one by more than
/// `threshold`.
///
/// The monotonic clock stops while the machine sleeps and the wall
/// clock does not. A wall clock that went backwards is not a resume.
pub fn detect_gap(wall: Option<Duration>, monotonic: Duration, threshold: Duration) -> bool {
    match wall {
        Some(wall) => wall.saturating_sub(monotonic) > threshold,
        None => false,
    }
}

/// Signal source that reports `Resume` after a detected sleep gap
#[derive(Debug, Clone, Copy)]
pub struct SuspendDetector {
    /// Sampling interval
    pub interval: Duration,
    /// Minimum unexplained wall-clock advance counted as a sleep
    pub threshold: Duration,
}

impl Default for SuspendDetector {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            threshold: Duration::from_secs(5),
        }
    }
}

impl SuspendDetector {
    pub fn new(interval: Duration, threshold: Duration) -> Self {
        Self {
            interval,
            threshold,
        }
    }
}

impl SignalSource for SuspendDetector {
    fn subscribe(&self, handler: SignalHandler) -> Result<SignalSubscription, SignalError> {
        let shutdown = Arc::new(Shutdown::new());
        let detector = *self;

        let worker_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("kbswitch-suspend".to_string())
            .spawn(move || {
                let mut wall = SystemTime::now();
                let mut mono = Instant::now();
                while !worker_shutdown.wait_timeout(detector.interval) {
                    let now_wall = SystemTime::now();
                    let now_mono = Instant::now();
                    let wall_elapsed = now_wall.duration_since(wall).ok();
                    let mono_elapsed = now_mono.duration_since(mono);

                    if detect_gap(wall_elapsed, mono_elapsed, detector.threshold) {
                        log::info!(
                            "Wall clock advanced {:?} over {:?} monotonic; assuming resume",
                            wall_elapsed.unwrap_or_default(),
                            mono_elapsed
                        );
                        handler(SystemSignal::Resume);
                    }
                    wall = now_wall;
                    mono = now_mono;
                }
            })
            .map_err(|e| SignalError::SubscriptionFailed(e.to_string()))?;

        Ok(SignalSubscription::new(move || {
            shutdown.trigger();
            // Cancelled from inside the handler: the loop exits on its own
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Suspend detector thread panicked");
            }
        }))
    }
}
