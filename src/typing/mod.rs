//! Snippet playback
//!
//! Turns snippet text into keyboard output:
//! - **Paste**: clipboard + Ctrl+V
//! - **Fast**: character by character with explicit delays
//! - **HumanLike**: character by character with randomized cadence
//! - **Macro**: like Fast, plus `{ENTER}`, `{CTRL+C}`, `{DELAY 100}` style tags
//!
//! One session plays at a time; starting a new one cancels the old one and
//! waits for it to finish first.

mod engine;
mod injector;
mod parser;
mod session;
mod timing;

use serde::{Deserialize, Serialize};

pub use engine::{EngineConfig, EngineState, PlaybackEngine, PlaybackRequest};
#[cfg(feature = "native")]
pub use injector::{EnigoInjector, SystemClipboard};
pub use injector::{Clipboard, Injector, MemoryClipboard, RecordingInjector};
pub use session::{Outcome, PlaybackHandle, SessionReport};

/// How snippet text is turned into keyboard output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingMode {
    /// Clipboard + paste chord
    Paste,
    /// Explicit per-char/per-word delays
    Fast,
    /// Randomized cadence
    #[default]
    HumanLike,
    /// Fast typing plus macro tags
    Macro,
}

impl std::fmt::Display for TypingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypingMode::Paste => write!(f, "paste"),
            TypingMode::Fast => write!(f, "fast"),
            TypingMode::HumanLike => write!(f, "human_like"),
            TypingMode::Macro => write!(f, "macro"),
        }
    }
}
