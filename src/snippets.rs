//! Snippet definitions read from settings

use serde::{Deserialize, Serialize};

use crate::hotkey::{Chord, ChordParseError, Key, Modifiers};
use crate::typing::{PlaybackRequest, TypingMode};

fn default_delay_per_char() -> u64 {
    10
}

fn default_delay_per_word() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

/// A named piece of text bound to an optional hotkey
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub name: String,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub mode: TypingMode,

    #[serde(default = "default_delay_per_char")]
    pub delay_per_char: u64,

    #[serde(default = "default_delay_per_word")]
    pub delay_per_word: u64,

    /// Chord string such as "Ctrl+Alt+F7"
    #[serde(default)]
    pub hotkey: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Snippet {
    /// Parsed hotkey, `None` when unassigned
    pub fn chord(&self) -> Option<Result<Chord, ChordParseError>> {
        self.hotkey.as_deref().map(str::parse)
    }

    /// Playback request for this snippet starting at `start_index`
    pub fn request(&self, start_index: usize) -> PlaybackRequest {
        PlaybackRequest::new(self.text.clone(), self.mode)
            .with_delays(self.delay_per_char, self.delay_per_word)
            .starting_at(start_index)
    }
}

#[cfg(test)]
impl Snippet {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            mode: TypingMode::default(),
            delay_per_char: default_delay_per_char(),
            delay_per_word: default_delay_per_word(),
            hotkey: None,
            enabled: default_enabled(),
        }
    }

    pub fn with_mode(mut self, mode: TypingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_hotkey(mut self, hotkey: impl Into<String>) -> Self {
        self.hotkey = Some(hotkey.into());
        self
    }
}

/// Message for the first enabled snippet other than `exclude` already
/// bound to `chord`
pub fn find_conflict(snippets: &[Snippet], chord: &Chord, exclude: Option<&str>) -> Option<String> {
    snippets
        .iter()
        .filter(|s| s.enabled && Some(s.name.as_str()) != exclude)
        .find(|s| matches!(s.chord(), Some(Ok(c)) if c == *chord))
        .map(|s| format!("Conflict with '{}'", s.name))
}

/// First of Ctrl+Alt+F7 through Ctrl+Alt+F12 no snippet uses
pub fn next_free_chord(snippets: &[Snippet]) -> Option<Chord> {
    const CANDIDATES: [Key; 6] = [Key::F7, Key::F8, Key::F9, Key::F10, Key::F11, Key::F12];

    CANDIDATES
        .iter()
        .map(|key| Chord::new(Modifiers::CONTROL | Modifiers::ALT, *key))
        .find(|chord| !snippets.iter().any(|s| matches!(s.chord(), Some(Ok(c)) if c == *chord)))
}
