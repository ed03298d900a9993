//! Keyboard injection and clipboard capabilities
//!
//! The engine talks to the outside world only through `Injector` and
//! `Clipboard`. Every primitive call goes through [`with_retry`]. Recording
//! backends are used for dry-run mode and tests; `enigo` and `arboard`
//! backends are available with the `native` feature.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::hotkey::Key;

/// Attempts per primitive injection call
pub const RETRY_ATTEMPTS: u32 = 3;

/// Pause between attempts
pub const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Low-level keyboard output. Each call reports success of one attempt.
pub trait Injector: Send + Sync {
    fn key_down(&self, key: Key) -> bool;
    fn key_up(&self, key: Key) -> bool;
    /// Type one character regardless of keyboard layout
    fn unicode_char(&self, c: char) -> bool;
}

/// Clipboard access for paste mode
pub trait Clipboard: Send + Sync {
    fn get_text(&self) -> Option<String>;
    fn set_text(&self, text: &str) -> bool;
}

/// Run `op` up to `attempts` times, blocking for `backoff` between attempts
pub fn with_retry(attempts: u32, backoff: Duration, mut op: impl FnMut() -> bool) -> bool {
    for attempt in 1..=attempts {
        if op() {
            return true;
        }
        if attempt < attempts {
            thread::sleep(backoff);
        }
    }
    false
}

/// One primitive call seen by a [`RecordingInjector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injected {
    KeyDown(Key),
    KeyUp(Key),
    Char(char),
}

/// Injector that records calls instead of touching the keyboard
#[derive(Debug, Default)]
pub struct RecordingInjector {
    log: Mutex<Vec<Injected>>,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call recorded so far
    #[cfg(test)]
    pub fn calls(&self) -> Vec<Injected> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Characters typed through `unicode_char`, in order
    #[cfg(test)]
    pub fn typed(&self) -> String {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Injected::Char(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Injected) -> bool {
        trace!(?call, "injected");
        match self.log.lock() {
            Ok(mut log) => {
                log.push(call);
                true
            }
            Err(_) => false,
        }
    }
}

impl Injector for RecordingInjector {
    fn key_down(&self, key: Key) -> bool {
        self.record(Injected::KeyDown(key))
    }

    fn key_up(&self, key: Key) -> bool {
        self.record(Injected::KeyUp(key))
    }

    fn unicode_char(&self, c: char) -> bool {
        self.record(Injected::Char(c))
    }
}

/// Process-local clipboard
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    text: Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clipboard for MemoryClipboard {
    fn get_text(&self) -> Option<String> {
        self.text.lock().ok().and_then(|t| t.clone())
    }

    fn set_text(&self, text: &str) -> bool {
        match self.text.lock() {
            Ok(mut slot) => {
                *slot = Some(text.to_string());
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(feature = "native")]
pub use native::{EnigoInjector, SystemClipboard};

#[cfg(feature = "native")]
mod native {
    use std::sync::Mutex;

    use enigo::{Direction, Enigo, Keyboard, Settings};
    use tracing::warn;

    use super::{Clipboard, Injector};
    use crate::hotkey::Key;

    /// Keyboard injection through `enigo`
    pub struct EnigoInjector {
        enigo: Mutex<Enigo>,
    }

    impl EnigoInjector {
        pub fn new() -> anyhow::Result<Self> {
            let enigo = Enigo::new(&Settings::default())
                .map_err(|e| anyhow::anyhow!("failed to initialize enigo: {}", e))?;
            Ok(Self {
                enigo: Mutex::new(enigo),
            })
        }

        fn key(&self, key: enigo::Key, direction: Direction) -> bool {
            let Ok(mut enigo) = self.enigo.lock() else {
                return false;
            };
            match enigo.key(key, direction) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "enigo key event failed");
                    false
                }
            }
        }
    }

    impl Injector for EnigoInjector {
        fn key_down(&self, key: Key) -> bool {
            match to_enigo(key) {
                Some(k) => self.key(k, Direction::Press),
                None => false,
            }
        }

        fn key_up(&self, key: Key) -> bool {
            match to_enigo(key) {
                Some(k) => self.key(k, Direction::Release),
                None => false,
            }
        }

        fn unicode_char(&self, c: char) -> bool {
            self.key(enigo::Key::Unicode(c), Direction::Click)
        }
    }

    fn to_enigo(key: Key) -> Option<enigo::Key> {
        use enigo::Key as E;

        if let Some(c) = key.as_char() {
            return Some(E::Unicode(c));
        }
        let k = match key {
            Key::F1 => E::F1,
            Key::F2 => E::F2,
            Key::F3 => E::F3,
            Key::F4 => E::F4,
            Key::F5 => E::F5,
            Key::F6 => E::F6,
            Key::F7 => E::F7,
            Key::F8 => E::F8,
            Key::F9 => E::F9,
            Key::F10 => E::F10,
            Key::F11 => E::F11,
            Key::F12 => E::F12,
            Key::Enter => E::Return,
            Key::Tab => E::Tab,
            Key::Backspace => E::Backspace,
            Key::Escape => E::Escape,
            Key::Space => E::Space,
            Key::Delete => E::Delete,
            Key::Home => E::Home,
            Key::End => E::End,
            Key::PageUp => E::PageUp,
            Key::PageDown => E::PageDown,
            Key::Left => E::LeftArrow,
            Key::Right => E::RightArrow,
            Key::Up => E::UpArrow,
            Key::Down => E::DownArrow,
            Key::LeftCtrl | Key::RightCtrl => E::Control,
            Key::LeftAlt | Key::RightAlt => E::Alt,
            Key::LeftShift | Key::RightShift => E::Shift,
            Key::LeftWin | Key::RightWin => E::Meta,
            _ => return None,
        };
        Some(k)
    }

    /// System clipboard through `arboard`, opened per call
    pub struct SystemClipboard;

    impl Clipboard for SystemClipboard {
        fn get_text(&self) -> Option<String> {
            arboard::Clipboard::new().ok()?.get_text().ok()
        }

        fn set_text(&self, text: &str) -> bool {
            match arboard::Clipboard::new() {
                Ok(mut clipboard) => match clipboard.set_text(text) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "failed to set clipboard");
                        false
                    }
                },
                Err(e) => {
                    warn!(error = %e, "clipboard unavailable");
                    false
                }
            }
        }
    }
}

/// Retrying view over an [`Injector`]
///
/// Each call reports whether the whole unit went through. Failed units are
/// logged here and counted by the caller.
pub(crate) struct ReliableInjector {
    inner: Arc<dyn Injector>,
    attempts: u32,
    backoff: Duration,
}

impl ReliableInjector {
    pub(crate) fn new(inner: Arc<dyn Injector>, attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub(crate) fn type_char(&self, c: char) -> bool {
        let ok = with_retry(self.attempts, self.backoff, || self.inner.unicode_char(c));
        if !ok {
            warn!(?c, "character dropped after retries");
        }
        ok
    }

    /// Press and release `key` with `modifiers` held. Every release is
    /// attempted even if an earlier press failed.
    pub(crate) fn chord(&self, modifiers: &[Key], key: Key) -> bool {
        let mut ok = true;
        for m in modifiers {
            ok &= self.press(*m, true);
        }
        ok &= self.press(key, true);
        ok &= self.press(key, false);
        for m in modifiers.iter().rev() {
            ok &= self.press(*m, false);
        }
        if !ok {
            warn!(?modifiers, ?key, "chord incomplete after retries");
        }
        ok
    }

    fn press(&self, key: Key, down: bool) -> bool {
        let ok = with_retry(self.attempts, self.backoff, || {
            if down {
                self.inner.key_down(key)
            } else {
                self.inner.key_up(key)
            }
        });
        if !ok {
            debug!(?key, down, "key event dropped");
        }
        ok
    }
}
