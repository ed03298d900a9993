//! Hotkey module for global hotkey registration and dispatch
//!
//! The registry owns bindings and the pause gate, the backend grabs key
//! combinations at the OS level, and the listener thread delivers fired
//! ids back to the registry.

mod backend;
mod keys;
mod listener;
mod registry;
mod validator;

#[cfg(feature = "native")]
pub use backend::NativeHotkeys;
pub use backend::{HotkeyBackend, VirtualHotkeys};
pub use keys::{Chord, ChordParseError, Key, Modifiers};
pub use listener::HotkeyListener;
pub use registry::HotkeyRegistry;
pub use validator::{validate, ValidationResult};
