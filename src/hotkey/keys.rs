//! Key and modifier definitions
//!
//! Provides the virtual key set understood by the daemon, the modifier
//! bit-set, and `Chord` (modifiers plus one primary key) with parsing from
//! and formatting to strings like `Ctrl+Alt+F7`.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

bitflags! {
    /// Modifier key mask for a hotkey or injected chord
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        /// Control key
        const CONTROL = 0b0001;
        /// Alt key
        const ALT = 0b0010;
        /// Shift key
        const SHIFT = 0b0100;
        /// Windows logo / Super key
        const WIN = 0b1000;
    }
}

impl Modifiers {
    /// Check if Control is the only modifier held (no Alt, no Shift)
    pub fn is_bare_control(&self) -> bool {
        self.contains(Self::CONTROL) && !self.intersects(Self::ALT | Self::SHIFT)
    }

    /// Keys to hold down, in press order, to produce this mask
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = Vec::with_capacity(4);
        if self.contains(Self::CONTROL) {
            keys.push(Key::LeftCtrl);
        }
        if self.contains(Self::ALT) {
            keys.push(Key::LeftAlt);
        }
        if self.contains(Self::SHIFT) {
            keys.push(Key::LeftShift);
        }
        if self.contains(Self::WIN) {
            keys.push(Key::LeftWin);
        }
        keys
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::CONTROL, "Ctrl"),
            (Self::ALT, "Alt"),
            (Self::SHIFT, "Shift"),
            (Self::WIN, "Win"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Virtual keys that can be bound as hotkeys or injected as key presses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,
    D0,
    D1,
    D2,
    D3,
    D4,
    D5,
    D6,
    D7,
    D8,
    D9,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    F13,
    F14,
    F15,
    F16,
    F17,
    F18,
    F19,
    F20,
    F21,
    F22,
    F23,
    F24,
    Enter,
    Tab,
    Backspace,
    Escape,
    Space,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Left,
    Right,
    Up,
    Down,
    LeftCtrl,
    RightCtrl,
    LeftAlt,
    RightAlt,
    LeftShift,
    RightShift,
    LeftWin,
    RightWin,
}

const LETTERS: [Key; 26] = [
    Key::A, Key::B, Key::C, Key::D, Key::E, Key::F, Key::G, Key::H, Key::I, Key::J, Key::K, Key::L,
    Key::M, Key::N, Key::O, Key::P, Key::Q, Key::R, Key::S, Key::T, Key::U, Key::V, Key::W, Key::X,
    Key::Y, Key::Z,
];

const DIGITS: [Key; 10] = [
    Key::D0, Key::D1, Key::D2, Key::D3, Key::D4, Key::D5, Key::D6, Key::D7, Key::D8, Key::D9,
];

const FUNCTION_KEYS: [Key; 24] = [
    Key::F1, Key::F2, Key::F3, Key::F4, Key::F5, Key::F6, Key::F7, Key::F8, Key::F9, Key::F10,
    Key::F11, Key::F12, Key::F13, Key::F14, Key::F15, Key::F16, Key::F17, Key::F18, Key::F19,
    Key::F20, Key::F21, Key::F22, Key::F23, Key::F24,
];

impl Key {
    /// Check if this key is itself a modifier (any Ctrl/Alt/Shift/Win variant)
    pub fn is_modifier(&self) -> bool {
        matches!(
            self,
            Key::LeftCtrl
                | Key::RightCtrl
                | Key::LeftAlt
                | Key::RightAlt
                | Key::LeftShift
                | Key::RightShift
                | Key::LeftWin
                | Key::RightWin
        )
    }

    /// Check if this is a Windows logo key
    pub fn is_windows_logo(&self) -> bool {
        matches!(self, Key::LeftWin | Key::RightWin)
    }

    /// Letter keys map to their lowercase character, digits to the digit
    pub fn as_char(&self) -> Option<char> {
        if let Some(i) = LETTERS.iter().position(|k| k == self) {
            return Some((b'a' + i as u8) as char);
        }
        DIGITS
            .iter()
            .position(|k| k == self)
            .map(|i| (b'0' + i as u8) as char)
    }

    /// Function key number (1 for F1), if this is a function key
    pub fn function_number(&self) -> Option<u8> {
        FUNCTION_KEYS
            .iter()
            .position(|k| k == self)
            .map(|i| i as u8 + 1)
    }

    fn name(&self) -> &'static str {
        match self {
            Key::Enter => "Enter",
            Key::Tab => "Tab",
            Key::Backspace => "Backspace",
            Key::Escape => "Esc",
            Key::Space => "Space",
            Key::Delete => "Delete",
            Key::Insert => "Insert",
            Key::Home => "Home",
            Key::End => "End",
            Key::PageUp => "PageUp",
            Key::PageDown => "PageDown",
            Key::Left => "Left",
            Key::Right => "Right",
            Key::Up => "Up",
            Key::Down => "Down",
            Key::LeftCtrl => "LeftCtrl",
            Key::RightCtrl => "RightCtrl",
            Key::LeftAlt => "LeftAlt",
            Key::RightAlt => "RightAlt",
            Key::LeftShift => "LeftShift",
            Key::RightShift => "RightShift",
            Key::LeftWin => "LeftWin",
            Key::RightWin => "RightWin",
            _ => "",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(c) = self.as_char() {
            return write!(f, "{}", c.to_ascii_uppercase());
        }
        if let Some(n) = self.function_number() {
            return write!(f, "F{}", n);
        }
        f.write_str(self.name())
    }
}

/// Errors from parsing key and chord strings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChordParseError {
    #[error("empty hotkey")]
    Empty,

    #[error("unknown key '{0}'")]
    UnknownKey(String),

    #[error("unknown modifier '{0}'")]
    UnknownModifier(String),
}

impl FromStr for Key {
    type Err = ChordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bytes = upper.as_bytes();

        if bytes.len() == 1 {
            let b = bytes[0];
            if b.is_ascii_uppercase() {
                return Ok(LETTERS[(b - b'A') as usize]);
            }
            if b.is_ascii_digit() {
                return Ok(DIGITS[(b - b'0') as usize]);
            }
        }

        if let Some(n) = upper.strip_prefix('F').and_then(|n| n.parse::<usize>().ok()) {
            if (1..=FUNCTION_KEYS.len()).contains(&n) {
                return Ok(FUNCTION_KEYS[n - 1]);
            }
        }

        let key = match upper.as_str() {
            "ENTER" | "RETURN" => Key::Enter,
            "TAB" => Key::Tab,
            "BS" | "BACK" | "BACKSPACE" => Key::Backspace,
            "ESC" | "ESCAPE" => Key::Escape,
            "SPACE" => Key::Space,
            "DEL" | "DELETE" => Key::Delete,
            "INS" | "INSERT" => Key::Insert,
            "HOME" => Key::Home,
            "END" => Key::End,
            "PAGEUP" | "PGUP" => Key::PageUp,
            "PAGEDOWN" | "PGDN" => Key::PageDown,
            "LEFT" => Key::Left,
            "RIGHT" => Key::Right,
            "UP" => Key::Up,
            "DOWN" => Key::Down,
            "LEFTCTRL" | "LCTRL" => Key::LeftCtrl,
            "RIGHTCTRL" | "RCTRL" => Key::RightCtrl,
            "LEFTALT" | "LALT" => Key::LeftAlt,
            "RIGHTALT" | "RALT" => Key::RightAlt,
            "LEFTSHIFT" | "LSHIFT" => Key::LeftShift,
            "RIGHTSHIFT" | "RSHIFT" => Key::RightShift,
            "LEFTWIN" | "LWIN" => Key::LeftWin,
            "RIGHTWIN" | "RWIN" => Key::RightWin,
            _ => return Err(ChordParseError::UnknownKey(s.trim().to_string())),
        };
        Ok(key)
    }
}

/// A key combination: zero or more modifiers plus one primary key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chord {
    pub modifiers: Modifiers,
    pub key: Key,
}

impl Chord {
    pub fn new(modifiers: Modifiers, key: Key) -> Self {
        Self { modifiers, key }
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.is_empty() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}+{}", self.modifiers, self.key)
        }
    }
}

impl FromStr for Chord {
    type Err = ChordParseError;

    /// Parse `Ctrl+Alt+F7` style strings. The last segment is the key,
    /// everything before it a modifier. Case and spacing are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('+').map(str::trim).collect();
        let (key, mods) = match parts.split_last() {
            Some((key, mods)) if !key.is_empty() => (key, mods),
            _ => return Err(ChordParseError::Empty),
        };

        let mut modifiers = Modifiers::empty();
        for name in mods {
            modifiers |= match name.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => Modifiers::CONTROL,
                "alt" | "option" => Modifiers::ALT,
                "shift" => Modifiers::SHIFT,
                "win" | "super" | "meta" | "cmd" => Modifiers::WIN,
                _ => return Err(ChordParseError::UnknownModifier(name.to_string())),
            };
        }

        Ok(Self::new(modifiers, key.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_control() {
        assert!(Modifiers::CONTROL.is_bare_control());
        assert!((Modifiers::CONTROL | Modifiers::WIN).is_bare_control());
        assert!(!(Modifiers::CONTROL | Modifiers::ALT).is_bare_control());
        assert!(!(Modifiers::CONTROL | Modifiers::SHIFT).is_bare_control());
        assert!(!Modifiers::ALT.is_bare_control());
    }

    #[test]
    fn test_modifier_press_order() {
        let mods = Modifiers::SHIFT | Modifiers::CONTROL;
        assert_eq!(mods.keys(), vec![Key::LeftCtrl, Key::LeftShift]);
        assert!(Modifiers::empty().keys().is_empty());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(Key::C.to_string(), "C");
        assert_eq!(Key::D7.to_string(), "7");
        assert_eq!(Key::F12.to_string(), "F12");
        assert_eq!(Key::Escape.to_string(), "Esc");
    }

    #[test]
    fn test_key_parse() {
        assert_eq!("c".parse::<Key>().unwrap(), Key::C);
        assert_eq!("F7".parse::<Key>().unwrap(), Key::F7);
        assert_eq!("f24".parse::<Key>().unwrap(), Key::F24);
        assert_eq!("escape".parse::<Key>().unwrap(), Key::Escape);
        assert_eq!("9".parse::<Key>().unwrap(), Key::D9);
        assert!("F25".parse::<Key>().is_err());
        assert!("hyper".parse::<Key>().is_err());
    }

    #[test]
    fn test_chord_parse() {
        let chord: Chord = "ctrl + alt + f7".parse().unwrap();
        assert_eq!(chord, Chord::new(Modifiers::CONTROL | Modifiers::ALT, Key::F7));
        assert_eq!(chord.to_string(), "Ctrl+Alt+F7");

        let bare: Chord = "Home".parse().unwrap();
        assert!(bare.modifiers.is_empty());
        assert_eq!(bare.to_string(), "Home");
    }

    #[test]
    fn test_chord_parse_errors() {
        assert_eq!("".parse::<Chord>(), Err(ChordParseError::Empty));
        assert_eq!("Ctrl+".parse::<Chord>(), Err(ChordParseError::Empty));
        assert_eq!(
            "Hyper+A".parse::<Chord>(),
            Err(ChordParseError::UnknownModifier("Hyper".to_string()))
        );
    }
}
