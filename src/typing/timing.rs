//! Per-unit typing delays
//!
//! Fast and macro text use the explicit per-char/per-word settings with a
//! 1 ms floor. Human-like typing samples from fixed ranges and only honours
//! the per-word setting at spaces and newlines.

use std::time::Duration;

use rand::Rng;

use super::TypingMode;

/// Smallest delay between two injected units
pub const MIN_DELAY: Duration = Duration::from_millis(1);

/// Wait after the paste chord so the target can read the clipboard
pub const PASTE_SETTLE: Duration = Duration::from_millis(100);

/// Kind of output unit a delay follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Ordinary printable character
    Char,
    /// Space, a word boundary
    Space,
    /// Line feed, typed as Enter
    Newline,
    /// Tab key
    Tab,
    /// Macro key chord
    Chord,
}

impl Unit {
    /// Classify a text character; `None` for carriage returns, which are skipped
    pub fn of(c: char) -> Option<Self> {
        match c {
            '\r' => None,
            '\n' => Some(Unit::Newline),
            '\t' => Some(Unit::Tab),
            ' ' => Some(Unit::Space),
            _ => Some(Unit::Char),
        }
    }

    fn is_word_boundary(&self) -> bool {
        matches!(self, Unit::Space | Unit::Newline)
    }
}

/// Computes delays for one session from its explicit settings
#[derive(Debug)]
pub struct TimingModel<R> {
    rng: R,
    delay_per_char: u64,
    delay_per_word: u64,
}

impl<R: Rng> TimingModel<R> {
    pub fn new(rng: R, delay_per_char: u64, delay_per_word: u64) -> Self {
        Self {
            rng,
            delay_per_char,
            delay_per_word,
        }
    }

    /// Delay to wait after injecting `unit` in `mode`
    pub fn delay(&mut self, mode: TypingMode, unit: Unit) -> Duration {
        match mode {
            TypingMode::Paste => PASTE_SETTLE,
            TypingMode::Fast | TypingMode::Macro => self.explicit(unit),
            TypingMode::HumanLike => self.human(unit),
        }
    }

    fn explicit(&self, unit: Unit) -> Duration {
        if unit.is_word_boundary() && self.delay_per_word > 0 {
            Duration::from_millis(self.delay_per_word)
        } else if self.delay_per_char > 0 {
            Duration::from_millis(self.delay_per_char)
        } else {
            MIN_DELAY
        }
    }

    fn human(&mut self, unit: Unit) -> Duration {
        let ms = match unit {
            Unit::Space if self.delay_per_word > 0 => self.delay_per_word,
            Unit::Space => self.rng.gen_range(30..80),
            Unit::Newline if self.delay_per_word > 0 => self.delay_per_word,
            Unit::Newline => self.rng.gen_range(50..150),
            Unit::Tab => self.rng.gen_range(40..80),
            Unit::Char | Unit::Chord => self.rng.gen_range(10..60),
        };
        Duration::from_millis(ms)
    }
}
