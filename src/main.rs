//! autotyper-daemon: types stored text snippets when global hotkeys fire
//!
//! This daemon provides:
//! - Global hotkeys bound to snippets, plus a pause toggle
//! - Playback in paste, fast, human-like and macro modes
//! - Cancellation and resume of the running session
//! - IPC server for status, control and event subscription
//!
//! Built without the `native` feature it runs in dry-run mode: nothing is
//! grabbed or typed, injected units are only logged.

mod config;
mod controller;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod snippets;
mod typing;

use std::sync::mpsc;
use std::sync::Arc;

use anyhow::Result;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::controller::Controller;
use crate::events::DaemonEvent;
use crate::hotkey::{HotkeyBackend, HotkeyListener, HotkeyRegistry};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::typing::{Clipboard, EngineConfig, Injector, PlaybackEngine};

/// OS-facing capabilities the daemon runs on
struct Backends {
    injector: Arc<dyn Injector>,
    clipboard: Option<Arc<dyn Clipboard>>,
    hotkeys: Box<dyn HotkeyBackend>,
    fired_rx: mpsc::Receiver<u32>,
}

impl Backends {
    #[cfg(feature = "native")]
    fn create() -> Result<Self> {
        use crate::hotkey::NativeHotkeys;
        use crate::typing::{EnigoInjector, SystemClipboard};

        let (hotkeys, fired_rx) = NativeHotkeys::spawn()?;
        Ok(Self {
            injector: Arc::new(EnigoInjector::new()?),
            clipboard: Some(Arc::new(SystemClipboard)),
            hotkeys: Box::new(hotkeys),
            fired_rx,
        })
    }

    #[cfg(not(feature = "native"))]
    fn create() -> Result<Self> {
        use crate::hotkey::VirtualHotkeys;
        use crate::typing::{MemoryClipboard, RecordingInjector};

        warn!("built without the native feature, running in dry-run mode");
        let (hotkeys, fired_rx) = VirtualHotkeys::new();
        Ok(Self {
            injector: Arc::new(RecordingInjector::new()),
            clipboard: Some(Arc::new(MemoryClipboard::new())),
            hotkeys: Box::new(hotkeys),
            fired_rx,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = env!("CARGO_PKG_VERSION"), "autotyper-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        socket_path = ?config.socket_path,
        settings_path = ?config.settings_path,
        snippets = config.settings.snippets.len(),
        "configuration loaded"
    );

    let mut shutdown = ShutdownSignal::new()?;

    // Registry and engine -> observers (IPC subscribers, log loop)
    let (event_tx, _event_rx) = broadcast::channel::<DaemonEvent>(64);

    let backends = Backends::create()?;

    let registry = Arc::new(HotkeyRegistry::new(backends.hotkeys, event_tx.clone()));
    let engine = Arc::new(PlaybackEngine::new(
        backends.injector,
        backends.clipboard,
        EngineConfig {
            seed: config.settings.seed,
            progress_every: config.settings.progress_every,
            ..EngineConfig::default()
        },
        event_tx.clone(),
    ));

    let controller = Arc::new(Controller::new(
        Arc::clone(&registry),
        engine,
        config.settings.snippets.clone(),
        config.settings.toggle_hotkey.clone(),
        Handle::current(),
    ));
    controller.bind_all();

    // Hotkey delivery runs on a dedicated thread
    let hotkey_listener = HotkeyListener::new(registry);
    match hotkey_listener.start(backends.fired_rx) {
        Ok(()) => {
            info!("hotkey listener started");
        }
        Err(e) => {
            error!(error = %e, "failed to start hotkey listener");
            warn!("continuing without hotkey support, playback is still available over IPC");
        }
    }

    let server = Server::new(&config.socket_path, Arc::clone(&controller))?;

    let mut log_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = async {
            loop {
                match log_rx.recv().await {
                    Ok(event) => info!(%event, "daemon event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event log receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("event log loop exited");
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");

    controller.shutdown().await;
    hotkey_listener.stop();
    server.shutdown().await;

    info!("autotyper-daemon stopped");

    Ok(())
}
