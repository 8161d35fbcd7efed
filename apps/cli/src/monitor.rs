//! Bus watcher that reports removal of the tracked device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dfu_core::driver::attached_devices;
use dfu_core::events::DfuObserver;
use dfu_core::session::DisconnectHandle;
use tracing::{debug, warn};

const SCAN_INTERVAL: Duration = Duration::from_millis(200);

/// Polls the bus on a background thread until dropped.
pub struct BusMonitor {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BusMonitor {
    pub fn spawn<O: DfuObserver + 'static>(handle: DisconnectHandle<O>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                if let Some(tracked) = handle.tracked_device() {
                    match attached_devices() {
                        Ok(devices) if !devices.contains(&tracked) => {
                            if handle.device_removed(&tracked) {
                                debug!(device = %tracked, "Reported removal");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Bus scan failed"),
                    }
                }
                thread::sleep(SCAN_INTERVAL);
            }
        });
        Self {
            stop,
            thread: Some(thread),
        }
    }
}

impl Drop for BusMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
