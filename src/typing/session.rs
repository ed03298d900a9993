//! One playback session: cancellation, progress and the per-mode loops
//!
//! A session runs on its own tokio task. Cancellation is checked before
//! every unit; a unit that has started (a character, a chord, an explicit
//! delay) always finishes, so modifier keys are never left held down.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, trace};

use super::injector::{with_retry, Clipboard, ReliableInjector};
use super::parser::{self, Token};
use super::timing::{TimingModel, Unit};
use super::TypingMode;
use crate::hotkey::Key;

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Cancelled,
    Faulted { reason: String },
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Completed => write!(f, "completed"),
            Outcome::Cancelled => write!(f, "cancelled"),
            Outcome::Faulted { reason } => write!(f, "faulted: {}", reason),
        }
    }
}

/// Terminal record of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub outcome: Outcome,
    /// Characters consumed; the offset to resume from
    pub progress: usize,
    /// Units whose injection failed after every retry
    pub soft_failures: usize,
}

impl SessionReport {
    /// True if some output was dropped along the way
    pub fn soft_failed(&self) -> bool {
        self.soft_failures > 0
    }
}

/// Environment failures that end a session early
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("paste mode needs a clipboard, none is configured")]
    ClipboardUnavailable,

    #[error("failed to write snippet to the clipboard")]
    ClipboardWrite,
}

#[derive(Debug, Clone)]
pub(crate) enum SessionStatus {
    Running,
    Finished(SessionReport),
}

impl SessionStatus {
    fn is_finished(&self) -> bool {
        matches!(self, SessionStatus::Finished(_))
    }
}

/// Cooperative cancellation flag shared by a session and its handles
#[derive(Debug, Clone)]
pub(crate) struct CancelSignal(Arc<watch::Sender<bool>>);

impl CancelSignal {
    pub(crate) fn new() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }

    pub(crate) fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once `cancel` has been called
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives in self, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Caller-side view of a session
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    id: u64,
    mode: TypingMode,
    start_index: usize,
    cancel: CancelSignal,
    progress: watch::Receiver<usize>,
    status: watch::Receiver<SessionStatus>,
}

impl PlaybackHandle {
    pub(crate) fn new(
        id: u64,
        mode: TypingMode,
        start_index: usize,
        cancel: CancelSignal,
        progress: watch::Receiver<usize>,
        status: watch::Receiver<SessionStatus>,
    ) -> Self {
        Self {
            id,
            mode,
            start_index,
            cancel,
            progress,
            status,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> TypingMode {
        self.mode
    }

    /// Offset the session started from. Differs from the requested offset
    /// when it was clamped or a macro had to replay from the start.
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// Ask the session to stop before its next unit
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Latest reported progress
    pub fn progress(&self) -> usize {
        *self.progress.borrow()
    }

    /// Watch progress updates. Updates are throttled; the final value is
    /// always published.
    pub fn subscribe_progress(&self) -> watch::Receiver<usize> {
        self.progress.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.status.borrow().is_finished() && self.status.has_changed().is_ok()
    }

    /// Terminal report, if the session has finished
    #[cfg(test)]
    pub fn report(&self) -> Option<SessionReport> {
        match &*self.status.borrow() {
            SessionStatus::Finished(report) => Some(report.clone()),
            SessionStatus::Running => None,
        }
    }

    /// Wait for the session to reach a terminal state
    pub async fn wait(&self) -> SessionReport {
        let mut status = self.status.clone();
        if let Ok(status) = status.wait_for(SessionStatus::is_finished).await {
            if let SessionStatus::Finished(report) = &*status {
                return report.clone();
            }
        }

        // Task dropped its sender without finishing, i.e. it panicked
        SessionReport {
            outcome: Outcome::Faulted {
                reason: "session task ended unexpectedly".to_string(),
            },
            progress: self.progress(),
            soft_failures: 0,
        }
    }
}

/// Everything a session needs to run; owned by its task
pub(crate) struct PlaybackSession {
    pub(crate) id: u64,
    text: Arc<str>,
    mode: TypingMode,
    /// Offset playback actually starts from, after clamping and fallback
    start_index: usize,
    /// Parsed macro and the token/character to pick up at
    tokens: Vec<Token>,
    resume_at: (usize, usize),
    cursor: usize,
    units: usize,
    soft_failures: usize,
    progress_every: usize,
    cancel: CancelSignal,
    output: ReliableInjector,
    clipboard: Option<Arc<dyn Clipboard>>,
    timing: TimingModel<StdRng>,
    progress_tx: watch::Sender<usize>,
    retry_attempts: u32,
    retry_backoff: Duration,
}

pub(crate) struct SessionParts {
    pub(crate) output: ReliableInjector,
    pub(crate) clipboard: Option<Arc<dyn Clipboard>>,
    pub(crate) timing: TimingModel<StdRng>,
    pub(crate) cancel: CancelSignal,
    pub(crate) progress_tx: watch::Sender<usize>,
    pub(crate) progress_every: usize,
    pub(crate) retry_attempts: u32,
    pub(crate) retry_backoff: Duration,
}

impl PlaybackSession {
    pub(crate) fn new(
        id: u64,
        text: &str,
        mode: TypingMode,
        start_index: usize,
        parts: SessionParts,
    ) -> Self {
        let mut tokens = Vec::new();
        let mut resume_at = (0, 0);

        let effective = match mode {
            TypingMode::Paste => {
                if start_index > 0 {
                    debug!(session = id, "paste mode restarts from the beginning");
                }
                0
            }
            TypingMode::Fast | TypingMode::HumanLike => start_index.min(text.chars().count()),
            TypingMode::Macro => {
                tokens = parser::parse(text);
                let total: usize = tokens.iter().map(parser::text_len).sum();
                match resume_point(&tokens, start_index) {
                    Some(point) => {
                        resume_at = point;
                        start_index.min(total)
                    }
                    None => {
                        info!(
                            session = id,
                            start_index,
                            "resume crosses a key action or delay, replaying macro from the start"
                        );
                        0
                    }
                }
            }
        };
        parts.progress_tx.send_replace(effective);

        Self {
            id,
            text: Arc::from(text),
            mode,
            start_index: effective,
            tokens,
            resume_at,
            cursor: effective,
            units: 0,
            soft_failures: 0,
            progress_every: parts.progress_every.max(1),
            cancel: parts.cancel,
            output: parts.output,
            clipboard: parts.clipboard,
            timing: parts.timing,
            progress_tx: parts.progress_tx,
            retry_attempts: parts.retry_attempts,
            retry_backoff: parts.retry_backoff,
        }
    }

    /// Offset the session starts typing from
    pub(crate) fn start_index(&self) -> usize {
        self.start_index
    }

    /// Play the session to a terminal state
    pub(crate) async fn run(mut self) -> SessionReport {
        let result = match self.mode {
            TypingMode::Paste => self.paste().await,
            TypingMode::Fast | TypingMode::HumanLike => self.type_plain().await,
            TypingMode::Macro => self.type_macro().await,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Faulted {
                reason: e.to_string(),
            },
        };

        self.progress_tx.send_replace(self.cursor);
        SessionReport {
            outcome,
            progress: self.cursor,
            soft_failures: self.soft_failures,
        }
    }

    async fn paste(&mut self) -> Result<Outcome, PlaybackError> {
        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let clipboard = self
            .clipboard
            .clone()
            .ok_or(PlaybackError::ClipboardUnavailable)?;

        // Read but never restored
        let previous = clipboard.get_text();
        debug!(session = self.id, had_text = previous.is_some(), "clipboard captured");

        let text = Arc::clone(&self.text);
        if !with_retry(self.retry_attempts, self.retry_backoff, || clipboard.set_text(&text)) {
            return Err(PlaybackError::ClipboardWrite);
        }

        let pasted = self.output.chord(&[Key::LeftCtrl], Key::V);
        self.settle(pasted);
        // Not interruptible: the target still has to read the clipboard
        tokio::time::sleep(self.timing.delay(TypingMode::Paste, Unit::Chord)).await;

        self.cursor = text.chars().count();
        Ok(Outcome::Completed)
    }

    async fn type_plain(&mut self) -> Result<Outcome, PlaybackError> {
        let text = Arc::clone(&self.text);
        let start = self.start_index;
        self.publish();

        if self.type_chars(&text, start).await {
            Ok(Outcome::Completed)
        } else {
            Ok(Outcome::Cancelled)
        }
    }

    async fn type_macro(&mut self) -> Result<Outcome, PlaybackError> {
        let tokens = std::mem::take(&mut self.tokens);
        let (first, skip) = self.resume_at;
        self.publish();

        for (i, token) in tokens.iter().enumerate().skip(first) {
            match token {
                Token::Text(run) => {
                    let offset = if i == first { skip } else { 0 };
                    if !self.type_chars(run, offset).await {
                        return Ok(Outcome::Cancelled);
                    }
                }
                Token::KeyAction(action) => {
                    if self.cancel.is_cancelled() {
                        return Ok(Outcome::Cancelled);
                    }
                    trace!(session = self.id, ?action, "key action");
                    let ok = self.output.chord(&action.modifiers.keys(), action.key);
                    self.settle(ok);
                    self.tick();
                    let delay = self.timing.delay(TypingMode::Macro, Unit::Chord);
                    self.pause(delay).await;
                }
                Token::Delay(ms) => {
                    if self.cancel.is_cancelled() {
                        return Ok(Outcome::Cancelled);
                    }
                    self.pause(Duration::from_millis(*ms)).await;
                }
            }
        }

        Ok(Outcome::Completed)
    }

    /// Type `run` from character `skip`. Returns false when cancelled.
    async fn type_chars(&mut self, run: &str, skip: usize) -> bool {
        for c in run.chars().skip(skip) {
            if self.cancel.is_cancelled() {
                return false;
            }

            let Some(unit) = Unit::of(c) else {
                self.cursor += 1;
                continue;
            };

            let ok = match unit {
                Unit::Newline => self.output.chord(&[], Key::Enter),
                Unit::Tab => self.output.chord(&[], Key::Tab),
                _ => self.output.type_char(c),
            };
            self.settle(ok);
            self.cursor += 1;
            self.tick();

            let delay = self.timing.delay(self.mode, unit);
            self.pause(delay).await;
        }
        true
    }

    /// Sleep between units; cut short by cancellation
    async fn pause(&self, delay: Duration) {
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {}
        }
    }

    /// Count a unit that failed after every retry
    fn settle(&mut self, ok: bool) {
        if !ok {
            self.soft_failures += 1;
        }
    }

    fn tick(&mut self) {
        self.units += 1;
        if self.units % self.progress_every == 0 {
            self.publish();
        }
    }

    fn publish(&self) {
        self.progress_tx.send_replace(self.cursor);
    }
}

/// Where to pick up a macro at character offset `start`: the token index and
/// how many of its characters to skip. `None` when reaching `start` would
/// cross a key action or delay; those have no character offset.
fn resume_point(tokens: &[Token], start: usize) -> Option<(usize, usize)> {
    if start == 0 {
        return Some((0, 0));
    }

    // Past the end: nothing left to type, key actions included
    let total: usize = tokens.iter().map(parser::text_len).sum();
    if start > total {
        return Some((tokens.len(), 0));
    }

    let mut consumed = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Text(run) => {
                let len = run.chars().count();
                if consumed + len > start {
                    return Some((i, start - consumed));
                }
                consumed += len;
                if consumed == start {
                    return Some((i + 1, 0));
                }
            }
            Token::KeyAction(_) | Token::Delay(_) => return None,
        }
    }

    Some((tokens.len(), 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_point_within_text() {
        let tokens = parser::parse("hello{ENTER}world");
        assert_eq!(resume_point(&tokens, 0), Some((0, 0)));
        assert_eq!(resume_point(&tokens, 2), Some((0, 2)));
        assert_eq!(resume_point(&tokens, 5), Some((1, 0)));
    }

    #[test]
    fn test_resume_point_crossing_action() {
        let tokens = parser::parse("hello{ENTER}world");
        assert_eq!(resume_point(&tokens, 6), None);

        let tokens = parser::parse("{DELAY 10}abc");
        assert_eq!(resume_point(&tokens, 1), None);
    }

    #[test]
    fn test_resume_point_past_end() {
        let tokens = parser::parse("abc");
        assert_eq!(resume_point(&tokens, 3), Some((1, 0)));
        assert_eq!(resume_point(&tokens, 10), Some((1, 0)));

        // A trailing action still plays at the exact end, never past it
        let tokens = parser::parse("abc{ENTER}");
        assert_eq!(resume_point(&tokens, 3), Some((1, 0)));
        assert_eq!(resume_point(&tokens, 4), Some((2, 0)));
        assert_eq!(resume_point(&tokens, 10), Some((2, 0)));
    }

    #[tokio::test]
    async fn test_cancel_signal() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        let waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        signal.cancel();
        task.await.unwrap();
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_report_soft_failed() {
        let report = SessionReport {
            outcome: Outcome::Completed,
            progress: 3,
            soft_failures: 1,
        };
        assert!(report.soft_failed());
        let json = serde_json::to_string(&report.outcome).unwrap();
        assert_eq!(json, r#"{"status":"completed"}"#);
    }
}
