//! Glue between snippets, hotkeys and the playback engine
//!
//! Binds configured snippets to hotkeys, starts playback when they fire and
//! remembers the last interrupted session so it can be resumed.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::hotkey::{validate, Chord, HotkeyRegistry, ValidationResult};
use crate::snippets::{find_conflict, next_free_chord, Snippet};
use crate::typing::{Outcome, PlaybackEngine, PlaybackHandle, SessionReport};

/// Errors from control requests
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("unknown snippet '{0}'")]
    UnknownSnippet(String),

    #[error("snippet '{0}' is disabled")]
    Disabled(String),

    #[error("playback is paused")]
    Paused,

    #[error("nothing to resume")]
    NothingToResume,

    #[error("invalid hotkey: {0}")]
    InvalidHotkey(String),

    #[error("no hotkey bound to {0}")]
    NotBound(Chord),
}

impl ControlError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::UnknownSnippet(_) => "unknown_snippet",
            ControlError::Disabled(_) => "disabled",
            ControlError::Paused => "paused",
            ControlError::NothingToResume => "nothing_to_resume",
            ControlError::InvalidHotkey(_) => "invalid_hotkey",
            ControlError::NotBound(_) => "not_bound",
        }
    }
}

/// A cancelled session that can be picked up again
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interrupted {
    pub snippet: String,
    pub progress: usize,
}

/// Result of binding the configured snippets
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BindSummary {
    pub bound: usize,
    pub skipped: usize,
}

/// Starts sessions and tracks how the latest one ended
struct Player {
    engine: Arc<PlaybackEngine>,
    runtime: Handle,
    last: Mutex<Last>,
}

#[derive(Default)]
struct Last {
    session: u64,
    interrupted: Option<Interrupted>,
}

impl Player {
    async fn play(self: &Arc<Self>, snippet: &Snippet, start_index: usize) -> PlaybackHandle {
        let handle = self.engine.begin(snippet.request(start_index)).await;
        info!(snippet = %snippet.name, session = handle.id(), "playing snippet");

        let player = Arc::clone(self);
        let name = snippet.name.clone();
        let watched = handle.clone();
        self.runtime.spawn(async move {
            let report = watched.wait().await;
            player.record(watched.id(), name, &report);
        });

        handle
    }

    fn record(&self, session: u64, snippet: String, report: &SessionReport) {
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        // A newer session already reported
        if session < last.session {
            return;
        }
        last.session = session;
        last.interrupted = match report.outcome {
            Outcome::Cancelled => {
                debug!(%snippet, progress = report.progress, "session can be resumed");
                Some(Interrupted {
                    snippet,
                    progress: report.progress,
                })
            }
            _ => None,
        };
    }

    fn interrupted(&self) -> Option<Interrupted> {
        self.last.lock().ok().and_then(|last| last.interrupted.clone())
    }

    fn take_interrupted(&self) -> Option<Interrupted> {
        self.last.lock().ok().and_then(|mut last| last.interrupted.take())
    }
}

/// Owns the snippet set and drives the registry and engine on its behalf
pub struct Controller {
    registry: Arc<HotkeyRegistry>,
    player: Arc<Player>,
    snippets: Vec<Snippet>,
    toggle_hotkey: Option<String>,
    started: Instant,
}

impl Controller {
    /// Create a controller. Hotkey callbacks spawn playback onto `runtime`.
    pub fn new(
        registry: Arc<HotkeyRegistry>,
        engine: Arc<PlaybackEngine>,
        snippets: Vec<Snippet>,
        toggle_hotkey: Option<String>,
        runtime: Handle,
    ) -> Self {
        Self {
            registry,
            player: Arc::new(Player {
                engine,
                runtime,
                last: Mutex::new(Last::default()),
            }),
            snippets,
            toggle_hotkey,
            started: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<HotkeyRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<PlaybackEngine> {
        &self.player.engine
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Session that `resume` would continue, if any
    pub fn interrupted(&self) -> Option<Interrupted> {
        self.player.interrupted()
    }

    /// Register the pause toggle and every enabled snippet with a usable
    /// hotkey. Existing bindings are dropped first.
    pub fn bind_all(&self) -> BindSummary {
        self.registry.unregister_all();
        let mut summary = BindSummary::default();

        if let Some(raw) = &self.toggle_hotkey {
            match raw.parse::<Chord>() {
                Ok(chord) => {
                    if let Err(e) = self.registry.register_toggle(chord) {
                        warn!(error = %e, "pause toggle not bound");
                    }
                }
                Err(e) => warn!(hotkey = %raw, error = %e, "invalid pause toggle hotkey"),
            }
        }

        let mut committed: Vec<Snippet> = Vec::new();
        for snippet in self.snippets.iter().filter(|s| s.enabled) {
            let Some(parsed) = snippet.chord() else {
                continue;
            };

            let chord = match parsed {
                Ok(chord) => chord,
                Err(e) => {
                    warn!(snippet = %snippet.name, error = %e, "invalid hotkey");
                    summary.skipped += 1;
                    continue;
                }
            };

            let result = validate(chord.modifiers, chord.key);
            if !result.valid {
                warn!(snippet = %snippet.name, %chord, reason = %result.message, "hotkey rejected");
                summary.skipped += 1;
                continue;
            }

            if let Some(conflict) = find_conflict(&committed, &chord, None) {
                warn!(snippet = %snippet.name, %chord, %conflict, "hotkey not bound");
                summary.skipped += 1;
                continue;
            }

            let player = Arc::clone(&self.player);
            let bound = snippet.clone();
            let callback = move || {
                let player = Arc::clone(&player);
                let snippet = bound.clone();
                player.runtime.clone().spawn(async move {
                    player.play(&snippet, 0).await;
                });
            };

            match self.registry.register(chord, callback) {
                Ok(_) => {
                    committed.push(snippet.clone());
                    summary.bound += 1;
                }
                Err(e) => {
                    warn!(snippet = %snippet.name, error = %e, "failed to register hotkey");
                    summary.skipped += 1;
                }
            }
        }

        info!(bound = summary.bound, skipped = summary.skipped, "snippet hotkeys bound");
        summary
    }

    /// Play a snippet from the beginning
    pub async fn play(&self, name: &str) -> Result<PlaybackHandle, ControlError> {
        let snippet = self.playable(name)?;
        Ok(self.player.play(snippet, 0).await)
    }

    /// Continue the last cancelled session from where it stopped
    pub async fn resume(&self) -> Result<PlaybackHandle, ControlError> {
        if self.registry.is_paused() {
            return Err(ControlError::Paused);
        }
        let interrupted = self
            .player
            .take_interrupted()
            .ok_or(ControlError::NothingToResume)?;
        let snippet = self.playable(&interrupted.snippet)?;

        info!(snippet = %snippet.name, from = interrupted.progress, "resuming snippet");
        Ok(self.player.play(snippet, interrupted.progress).await)
    }

    /// Cancel the running session, if any
    pub async fn cancel(&self) -> Option<(u64, SessionReport)> {
        self.player.engine.cancel_active().await
    }

    /// Fire a bound hotkey without touching the keyboard. Goes through the
    /// same path as a real press, so the pause gate applies.
    pub fn press_hotkey(&self, hotkey: &str) -> Result<(), ControlError> {
        let chord = hotkey
            .parse::<Chord>()
            .map_err(|e| ControlError::InvalidHotkey(e.to_string()))?;

        if !self.registry.press(chord) {
            return Err(ControlError::NotBound(chord));
        }
        debug!(%chord, "hotkey pressed over IPC");
        Ok(())
    }

    /// Validate `hotkey` and check it against the other snippets and the
    /// pause toggle
    pub fn validate_hotkey(&self, hotkey: &str, snippet: Option<&str>) -> ValidationResult {
        let chord = match hotkey.parse::<Chord>() {
            Ok(chord) => chord,
            Err(e) => {
                return ValidationResult {
                    valid: false,
                    message: e.to_string(),
                    suggestions: Vec::new(),
                }
            }
        };

        let mut result = validate(chord.modifiers, chord.key);
        if !result.valid {
            return result;
        }

        let conflict = find_conflict(&self.snippets, &chord, snippet).or_else(|| {
            (self.registry.toggle_chord() == Some(chord))
                .then(|| "Conflict with the pause toggle".to_string())
        });

        if let Some(message) = conflict {
            result.valid = false;
            result.message = message;
            result.suggestions = next_free_chord(&self.snippets)
                .map(|c| vec![c.to_string()])
                .unwrap_or_default();
        }
        result
    }

    /// Cancel playback and release every hotkey
    pub async fn shutdown(&self) {
        if let Some((session, report)) = self.cancel().await {
            info!(session, progress = report.progress, "cancelled session on shutdown");
        }
        self.registry.unregister_all();
    }

    fn playable(&self, name: &str) -> Result<&Snippet, ControlError> {
        let snippet = self
            .snippets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ControlError::UnknownSnippet(name.to_string()))?;

        if !snippet.enabled {
            return Err(ControlError::Disabled(snippet.name.clone()));
        }
        if self.registry.is_paused() {
            return Err(ControlError::Paused);
        }
        Ok(snippet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::VirtualHotkeys;
    use crate::typing::{EngineConfig, RecordingInjector, TypingMode};
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn create_controller(snippets: Vec<Snippet>) -> (Controller, Arc<RecordingInjector>) {
        let (tx, _) = broadcast::channel(64);
        let (backend, _fired) = VirtualHotkeys::new();
        let registry = Arc::new(HotkeyRegistry::new(Box::new(backend), tx.clone()));
        let injector = Arc::new(RecordingInjector::new());
        let config = EngineConfig {
            retry_backoff: Duration::ZERO,
            seed: Some(1),
            ..EngineConfig::default()
        };
        let engine = Arc::new(PlaybackEngine::new(injector.clone(), None, config, tx));
        let controller = Controller::new(
            registry,
            engine,
            snippets,
            Some("Ctrl+Shift+F12".to_string()),
            Handle::current(),
        );
        (controller, injector)
    }

    fn fast(name: &str, text: &str, hotkey: &str) -> Snippet {
        let mut snippet = Snippet::new(name, text)
            .with_mode(TypingMode::Fast)
            .with_hotkey(hotkey);
        snippet.delay_per_char = 10;
        snippet.delay_per_word = 0;
        snippet
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_all_skips_bad_hotkeys() {
        let mut disabled = fast("off", "x", "Ctrl+Alt+F9");
        disabled.enabled = false;
        let (controller, _) = create_controller(vec![
            fast("one", "1", "Ctrl+Alt+F7"),
            fast("dup", "2", "ctrl+alt+f7"),
            fast("common", "3", "Ctrl+C"),
            fast("garbage", "4", "Ctrl+Nope"),
            disabled,
            Snippet::new("none", "5"),
        ]);

        let summary = controller.bind_all();
        assert_eq!(summary, BindSummary { bound: 1, skipped: 3 });
        assert_eq!(controller.registry().bindings().len(), 1);
        assert!(controller.registry().toggle_chord().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hotkey_plays_snippet() {
        let (controller, injector) = create_controller(vec![fast("greet", "hi", "Ctrl+Alt+F7")]);
        controller.bind_all();

        let (id, _) = controller.registry().bindings()[0];
        assert!(controller.registry().dispatch(id));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(injector.typed(), "hi");
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_hotkey() {
        let (controller, injector) = create_controller(vec![fast("greet", "hi", "Ctrl+Alt+F7")]);
        controller.bind_all();

        controller.press_hotkey("ctrl+alt+f7").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(injector.typed(), "hi");

        assert_eq!(
            controller.press_hotkey("Ctrl+Alt+F9").unwrap_err().code(),
            "not_bound"
        );
        assert_eq!(
            controller.press_hotkey("Ctrl+Nope").unwrap_err().code(),
            "invalid_hotkey"
        );

        // The toggle goes through the registry too
        controller.press_hotkey("Ctrl+Shift+F12").unwrap();
        assert!(controller.registry().is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_rejects_play() {
        let (controller, injector) = create_controller(vec![fast("greet", "hi", "Ctrl+Alt+F7")]);
        controller.registry().set_paused(true);

        assert_eq!(controller.play("greet").await.unwrap_err(), ControlError::Paused);
        assert!(injector.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_snippet() {
        let (controller, _) = create_controller(vec![]);
        assert_eq!(
            controller.play("nope").await.unwrap_err(),
            ControlError::UnknownSnippet("nope".to_string())
        );
        assert_eq!(controller.resume().await.unwrap_err(), ControlError::NothingToResume);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_then_resume() {
        let (controller, injector) =
            create_controller(vec![fast("alpha", "abcdefghijklmnopqrstuvwxyz", "Ctrl+Alt+F7")]);

        let handle = controller.play("alpha").await.unwrap();
        tokio::time::sleep(Duration::from_millis(55)).await;
        let (_, report) = controller.cancel().await.unwrap();
        assert_eq!(report.outcome, Outcome::Cancelled);

        // Let the watcher record the interruption
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        let interrupted = controller.interrupted().unwrap();
        assert_eq!(interrupted.snippet, "alpha");
        assert_eq!(interrupted.progress, report.progress);
        assert_ne!(handle.id(), 0);

        let resumed = controller.resume().await.unwrap();
        assert_eq!(resumed.wait().await.outcome, Outcome::Completed);
        assert_eq!(injector.typed(), "abcdefghijklmnopqrstuvwxyz");

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(controller.interrupted().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_hotkey() {
        let (controller, _) = create_controller(vec![
            fast("one", "1", "Ctrl+Alt+F7"),
            fast("two", "2", "Ctrl+Alt+F8"),
        ]);
        controller.bind_all();

        let ok = controller.validate_hotkey("Ctrl+Alt+F10", None);
        assert!(ok.valid);

        let conflict = controller.validate_hotkey("Ctrl+Alt+F8", Some("one"));
        assert!(!conflict.valid);
        assert_eq!(conflict.message, "Conflict with 'two'");
        assert_eq!(conflict.suggestions, vec!["Ctrl+Alt+F9".to_string()]);

        // Editing a snippet's own hotkey is not a conflict
        assert!(controller.validate_hotkey("Ctrl+Alt+F8", Some("two")).valid);

        let toggle = controller.validate_hotkey("Ctrl+Shift+F12", None);
        assert_eq!(toggle.message, "Conflict with the pause toggle");

        let common = controller.validate_hotkey("Ctrl+V", None);
        assert_eq!(common.suggestions, vec!["Alt+V".to_string(), "Ctrl+Alt+V".to_string()]);

        assert!(!controller.validate_hotkey("Ctrl+Bogus", None).valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_everything() {
        let (controller, _) = create_controller(vec![fast("alpha", "abcdefghij", "Ctrl+Alt+F7")]);
        controller.bind_all();
        controller.play("alpha").await.unwrap();

        controller.shutdown().await;
        assert!(controller.registry().bindings().is_empty());
        assert!(controller.registry().toggle_chord().is_none());
        assert_eq!(controller.engine().state(), crate::typing::EngineState::Idle);
    }
}
