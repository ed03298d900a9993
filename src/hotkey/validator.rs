//! Rule-based hotkey validation
//!
//! Rejects combinations that cannot or should not be bound globally:
//! missing modifiers, modifier-only presses, OS-reserved shortcuts and
//! common application shortcuts. Rules are evaluated in order and the first
//! match wins. Conflicts with other bindings are checked by the caller,
//! which holds the full binding table.

use serde::Serialize;

use super::keys::{Key, Modifiers};

/// Ctrl+<key> shortcuts used by nearly every application
const COMMON_SHORTCUTS: [Key; 9] = [
    Key::C,
    Key::V,
    Key::X,
    Key::Z,
    Key::Y,
    Key::S,
    Key::P,
    Key::F,
    Key::A,
];

/// Outcome of validating one hotkey combination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub message: String,
    /// Alternative combinations to offer, best first
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    fn valid() -> Self {
        Self {
            valid: true,
            message: String::new(),
            suggestions: Vec::new(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            suggestions: Vec::new(),
        }
    }
}

/// Validate a modifier + key combination
pub fn validate(modifiers: Modifiers, key: Key) -> ValidationResult {
    if modifiers.is_empty() {
        return ValidationResult::invalid("Hotkeys must include a modifier such as Ctrl or Alt.");
    }

    if key.is_modifier() {
        return ValidationResult::invalid("Press a key combination.");
    }

    if key.is_windows_logo() {
        return ValidationResult::invalid("Windows key combinations are reserved.");
    }

    if is_system_reserved(modifiers, key) {
        return ValidationResult::invalid("System key combination is reserved.");
    }

    if modifiers.is_bare_control() && COMMON_SHORTCUTS.contains(&key) {
        let mut result = ValidationResult::invalid(format!(
            "Ctrl+{key} is a common shortcut. Use Alt or Ctrl+Alt."
        ));
        result.suggestions.push(format!("Alt+{key}"));
        result.suggestions.push(format!("Ctrl+Alt+{key}"));
        return result;
    }

    ValidationResult::valid()
}

/// Alt+Tab, Alt+Esc, Alt+F4, Ctrl+Esc and Ctrl+Alt+Delete
fn is_system_reserved(modifiers: Modifiers, key: Key) -> bool {
    let alt = modifiers.contains(Modifiers::ALT);
    let ctrl = modifiers.contains(Modifiers::CONTROL);

    (alt && matches!(key, Key::Tab | Key::Escape | Key::F4))
        || (ctrl && key == Key::Escape)
        || (ctrl && alt && key == Key::Delete)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_modifier() {
        let result = validate(Modifiers::empty(), Key::A);
        assert!(!result.valid);
        assert!(result.message.contains("modifier"));
        assert!(result.suggestions.is_empty());
    }

    #[test]
    fn test_modifier_key_alone() {
        let result = validate(Modifiers::CONTROL, Key::LeftShift);
        assert!(!result.valid);
        assert_eq!(result.message, "Press a key combination.");

        // Win keys are modifiers too, so rule 2 claims them first
        let result = validate(Modifiers::ALT, Key::RightWin);
        assert_eq!(result.message, "Press a key combination.");
    }

    #[test]
    fn test_system_reserved() {
        for (mods, key) in [
            (Modifiers::ALT, Key::Tab),
            (Modifiers::ALT, Key::Escape),
            (Modifiers::ALT, Key::F4),
            (Modifiers::CONTROL, Key::Escape),
            (Modifiers::CONTROL | Modifiers::ALT, Key::Delete),
        ] {
            let result = validate(mods, key);
            assert!(!result.valid, "{mods}+{key} should be reserved");
            assert!(result.message.contains("reserved"));
        }
    }

    #[test]
    fn test_common_shortcut_suggestions() {
        let result = validate(Modifiers::CONTROL, Key::C);
        assert!(!result.valid);
        assert_eq!(result.suggestions, vec!["Alt+C", "Ctrl+Alt+C"]);
    }

    #[test]
    fn test_common_shortcut_with_extra_modifier_is_allowed() {
        assert!(validate(Modifiers::CONTROL | Modifiers::SHIFT, Key::S).valid);
        assert!(validate(Modifiers::CONTROL | Modifiers::ALT, Key::V).valid);
        assert!(validate(Modifiers::ALT, Key::C).valid);
    }

    #[test]
    fn test_valid_combination() {
        let result = validate(Modifiers::CONTROL | Modifiers::ALT, Key::F7);
        assert!(result.valid);
        assert!(result.message.is_empty());
        assert!(result.suggestions.is_empty());
    }

    #[test]
    fn test_result_serialization() {
        let json = serde_json::to_string(&validate(Modifiers::CONTROL, Key::V)).unwrap();
        assert!(json.contains("\"valid\":false"));
        assert!(json.contains("Ctrl+Alt+V"));
    }
}
