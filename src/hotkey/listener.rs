//! Hotkey delivery thread
//!
//! Receives fired hotkey ids from the backend's delivery channel and
//! dispatches them through the registry. Runs on a dedicated thread so
//! callbacks never execute on the async runtime's worker threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use super::registry::HotkeyRegistry;

/// How often the delivery loop checks the running flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Delivers fired hotkey ids to the registry
pub struct HotkeyListener {
    registry: Arc<HotkeyRegistry>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl HotkeyListener {
    /// Create a new hotkey listener
    pub fn new(registry: Arc<HotkeyRegistry>) -> Self {
        Self {
            registry,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Start the delivery thread on `fired_rx`
    ///
    /// The thread runs until `stop()` is called or every sender of the
    /// channel is dropped.
    pub fn start(&self, fired_rx: mpsc::Receiver<u32>) -> Result<(), ListenerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ListenerError::AlreadyRunning);
        }

        let registry = Arc::clone(&self.registry);
        let running = Arc::clone(&self.running);

        let spawned = thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");
                run_delivery_loop(&registry, &fired_rx, &running);
                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            });

        match spawned {
            Ok(handle) => {
                if let Ok(mut slot) = self.handle.lock() {
                    *slot = Some(handle);
                }
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(ListenerError::ThreadSpawn(e.to_string()))
            }
        }
    }

    /// Stop the listener and wait for the thread to exit
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("hotkey listener thread panicked");
            }
        }
    }

    /// Check if the listener is currently running
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),
}

fn run_delivery_loop(
    registry: &HotkeyRegistry,
    fired_rx: &mpsc::Receiver<u32>,
    running: &AtomicBool,
) {
    while running.load(Ordering::SeqCst) {
        match fired_rx.recv_timeout(POLL_INTERVAL) {
            Ok(id) => {
                let handled = registry.dispatch(id);
                debug!(id, handled, "hotkey fired");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!("hotkey delivery channel closed");
                break;
            }
        }
    }
}
