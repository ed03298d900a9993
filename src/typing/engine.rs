//! Playback engine
//!
//! Admits one session at a time. `begin` cancels a running session and
//! waits for its terminal state before the new session is spawned, so output
//! from two sessions never interleaves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::injector::{Clipboard, Injector, ReliableInjector, RETRY_ATTEMPTS, RETRY_BACKOFF};
use super::session::{
    CancelSignal, PlaybackHandle, PlaybackSession, SessionParts, SessionReport, SessionStatus,
};
use super::timing::TimingModel;
use super::TypingMode;
use crate::events::DaemonEvent;

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Attempts per primitive injection call
    pub retry_attempts: u32,
    /// Blocking pause between attempts
    pub retry_backoff: Duration,
    /// Publish progress every this many units
    pub progress_every: usize,
    /// Seed for human-like timing; entropy when unset
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_attempts: RETRY_ATTEMPTS,
            retry_backoff: RETRY_BACKOFF,
            progress_every: 10,
            seed: None,
        }
    }
}

/// What to play
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    pub text: String,
    pub mode: TypingMode,
    pub delay_per_char: u64,
    pub delay_per_word: u64,
    /// Character offset to resume from
    pub start_index: usize,
}

impl PlaybackRequest {
    pub fn new(text: impl Into<String>, mode: TypingMode) -> Self {
        Self {
            text: text.into(),
            mode,
            delay_per_char: 0,
            delay_per_word: 0,
            start_index: 0,
        }
    }

    pub fn with_delays(mut self, delay_per_char: u64, delay_per_word: u64) -> Self {
        self.delay_per_char = delay_per_char;
        self.delay_per_word = delay_per_word;
        self
    }

    pub fn starting_at(mut self, start_index: usize) -> Self {
        self.start_index = start_index;
        self
    }
}

/// Whether a session is currently playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "Idle"),
            EngineState::Running => write!(f, "Running"),
        }
    }
}

/// Plays snippets through an injector, one session at a time
pub struct PlaybackEngine {
    injector: Arc<dyn Injector>,
    clipboard: Option<Arc<dyn Clipboard>>,
    config: EngineConfig,
    /// Serializes `begin` calls across the cancel-and-wait handshake
    admission: tokio::sync::Mutex<()>,
    active: Mutex<Option<PlaybackHandle>>,
    next_session: AtomicU64,
    event_tx: broadcast::Sender<DaemonEvent>,
}

impl PlaybackEngine {
    pub fn new(
        injector: Arc<dyn Injector>,
        clipboard: Option<Arc<dyn Clipboard>>,
        config: EngineConfig,
        event_tx: broadcast::Sender<DaemonEvent>,
    ) -> Self {
        Self {
            injector,
            clipboard,
            config,
            admission: tokio::sync::Mutex::new(()),
            active: Mutex::new(None),
            next_session: AtomicU64::new(1),
            event_tx,
        }
    }

    /// Start a session, replacing any running one
    ///
    /// Must be called from within a tokio runtime; the session runs on a
    /// spawned task.
    pub async fn begin(&self, request: PlaybackRequest) -> PlaybackHandle {
        let _admission = self.admission.lock().await;

        if let Some(previous) = self.active() {
            if previous.is_running() {
                info!(session = previous.id(), "cancelling running session");
                previous.cancel();
                let report = previous.wait().await;
                debug!(
                    session = previous.id(),
                    outcome = %report.outcome,
                    "previous session finished"
                );
            }
        }

        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let cancel = CancelSignal::new();
        let (progress_tx, progress_rx) = watch::channel(0);
        let (status_tx, status_rx) = watch::channel(SessionStatus::Running);

        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id)),
            None => StdRng::from_entropy(),
        };

        let session = PlaybackSession::new(
            id,
            &request.text,
            request.mode,
            request.start_index,
            SessionParts {
                output: ReliableInjector::new(
                    Arc::clone(&self.injector),
                    self.config.retry_attempts,
                    self.config.retry_backoff,
                ),
                clipboard: self.clipboard.clone(),
                timing: TimingModel::new(rng, request.delay_per_char, request.delay_per_word),
                cancel: cancel.clone(),
                progress_tx,
                progress_every: self.config.progress_every,
                retry_attempts: self.config.retry_attempts,
                retry_backoff: self.config.retry_backoff,
            },
        );

        let start_index = session.start_index();
        let handle = PlaybackHandle::new(
            id,
            request.mode,
            start_index,
            cancel,
            progress_rx,
            status_rx,
        );
        self.set_active(handle.clone());

        info!(
            session = id,
            mode = %request.mode,
            start_index,
            from = %EngineState::Idle,
            to = %EngineState::Running,
            "state transition"
        );
        let _ = self.event_tx.send(DaemonEvent::SessionStarted {
            session: id,
            mode: request.mode,
            start_index,
        });

        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let report = session.run().await;

            info!(
                session = id,
                outcome = %report.outcome,
                progress = report.progress,
                soft_failures = report.soft_failures,
                from = %EngineState::Running,
                to = %EngineState::Idle,
                "state transition"
            );
            if report.soft_failed() {
                warn!(
                    session = id,
                    count = report.soft_failures,
                    "some output could not be injected"
                );
            }

            let _ = event_tx.send(DaemonEvent::SessionFinished {
                session: id,
                outcome: report.outcome.clone(),
                progress: report.progress,
                soft_failures: report.soft_failures,
            });
            status_tx.send_replace(SessionStatus::Finished(report));
        });

        handle
    }

    /// Handle of the most recent session, finished or not
    pub fn active(&self) -> Option<PlaybackHandle> {
        self.active.lock().ok().and_then(|active| active.clone())
    }

    pub fn state(&self) -> EngineState {
        match self.active() {
            Some(handle) if handle.is_running() => EngineState::Running,
            _ => EngineState::Idle,
        }
    }

    /// Cancel the running session, if any, and wait for it to stop
    pub async fn cancel_active(&self) -> Option<(u64, SessionReport)> {
        let handle = self.active().filter(PlaybackHandle::is_running)?;
        handle.cancel();
        Some((handle.id(), handle.wait().await))
    }

    fn set_active(&self, handle: PlaybackHandle) {
        if let Ok(mut active) = self.active.lock() {
            *active = Some(handle);
        }
    }
}
