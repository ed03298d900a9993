//! OS hotkey capability
//!
//! `HotkeyBackend` is the seam between the registry and whatever actually
//! grabs key combinations system-wide. Fired hotkeys travel back as ids on a
//! `std::sync::mpsc` channel consumed by `HotkeyListener`.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Mutex;

use tracing::debug;

use super::keys::{Chord, Key, Modifiers};

/// Binds and unbinds system-wide hotkeys
pub trait HotkeyBackend: Send {
    /// Grab `modifiers + key` and report it under `id`. Returns false when the
    /// OS refuses, e.g. because the combination is already taken.
    fn bind(&self, modifiers: Modifiers, key: Key, id: u32) -> bool;

    /// Release the grab made for `id`; unknown ids are ignored
    fn unbind(&self, id: u32);

    /// Deliver `chord` as if it had been pressed. Backends that cannot
    /// synthesize presses return false.
    fn simulate(&self, _chord: Chord) -> bool {
        false
    }
}

/// In-memory stand-in for the OS hotkey table
///
/// Rejects a second bind of an already-bound chord the way the OS does.
/// Presses are simulated by pushing the bound id onto the delivery channel.
pub struct VirtualHotkeys {
    bound: Mutex<HashMap<u32, Chord>>,
    fired_tx: mpsc::Sender<u32>,
}

impl VirtualHotkeys {
    /// Create the backend and the receiving end of its delivery channel
    pub fn new() -> (Self, mpsc::Receiver<u32>) {
        let (fired_tx, fired_rx) = mpsc::channel();
        let backend = Self {
            bound: Mutex::new(HashMap::new()),
            fired_tx,
        };
        (backend, fired_rx)
    }
}

impl HotkeyBackend for VirtualHotkeys {
    fn bind(&self, modifiers: Modifiers, key: Key, id: u32) -> bool {
        let chord = Chord::new(modifiers, key);
        let Ok(mut bound) = self.bound.lock() else {
            return false;
        };
        if bound.values().any(|c| *c == chord) || bound.contains_key(&id) {
            debug!(%chord, id, "virtual bind rejected");
            return false;
        }
        bound.insert(id, chord);
        true
    }

    fn unbind(&self, id: u32) {
        if let Ok(mut bound) = self.bound.lock() {
            bound.remove(&id);
        }
    }

    fn simulate(&self, chord: Chord) -> bool {
        let id = self
            .bound
            .lock()
            .ok()
            .and_then(|bound| bound.iter().find(|(_, c)| **c == chord).map(|(id, _)| *id));

        match id {
            Some(id) => self.fired_tx.send(id).is_ok(),
            None => false,
        }
    }
}

#[cfg(feature = "native")]
pub use native::NativeHotkeys;

#[cfg(feature = "native")]
mod native {
    //! `global-hotkey` backend
    //!
    //! The manager lives on its own thread and is driven by commands, so the
    //! registry only ever holds a channel sender.

    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use global_hotkey::hotkey::{Code, HotKey, Modifiers as HkModifiers};
    use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
    use tracing::{error, info, warn};

    use super::HotkeyBackend;
    use crate::hotkey::keys::{Key, Modifiers};

    enum Command {
        Bind {
            hotkey: HotKey,
            id: u32,
            reply: mpsc::Sender<bool>,
        },
        Unbind {
            id: u32,
        },
    }

    /// System-wide hotkeys through the `global-hotkey` crate
    pub struct NativeHotkeys {
        commands: mpsc::Sender<Command>,
    }

    impl NativeHotkeys {
        /// Spawn the manager thread. Returns the backend and the delivery
        /// channel of fired ids.
        pub fn spawn() -> anyhow::Result<(Self, mpsc::Receiver<u32>)> {
            let (commands, command_rx) = mpsc::channel();
            let (fired_tx, fired_rx) = mpsc::channel();
            let (ready_tx, ready_rx) = mpsc::channel();

            thread::Builder::new()
                .name("hotkey-manager".to_string())
                .spawn(move || {
                    let manager = match GlobalHotKeyManager::new() {
                        Ok(manager) => {
                            let _ = ready_tx.send(Ok(()));
                            manager
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    run_manager(manager, command_rx, fired_tx);
                })?;

            ready_rx
                .recv()?
                .map_err(|e| anyhow::anyhow!("failed to create hotkey manager: {}", e))?;

            info!("native hotkey manager started");
            Ok((Self { commands }, fired_rx))
        }
    }

    impl HotkeyBackend for NativeHotkeys {
        fn bind(&self, modifiers: Modifiers, key: Key, id: u32) -> bool {
            let Some(code) = to_code(key) else {
                warn!(?key, "key has no native hotkey code");
                return false;
            };
            let hotkey = HotKey::new(Some(to_modifiers(modifiers)), code);
            let (reply, reply_rx) = mpsc::channel();
            if self.commands.send(Command::Bind { hotkey, id, reply }).is_err() {
                return false;
            }
            reply_rx.recv().unwrap_or(false)
        }

        fn unbind(&self, id: u32) {
            let _ = self.commands.send(Command::Unbind { id });
        }
    }

    fn run_manager(
        manager: GlobalHotKeyManager,
        command_rx: mpsc::Receiver<Command>,
        fired_tx: mpsc::Sender<u32>,
    ) {
        // our id -> hotkey, and the crate's hotkey id -> our id
        let mut hotkeys: HashMap<u32, HotKey> = HashMap::new();
        let mut ours: HashMap<u32, u32> = HashMap::new();

        loop {
            loop {
                match command_rx.try_recv() {
                    Ok(Command::Bind { hotkey, id, reply }) => {
                        let ok = match manager.register(hotkey) {
                            Ok(()) => {
                                hotkeys.insert(id, hotkey);
                                ours.insert(hotkey.id(), id);
                                true
                            }
                            Err(e) => {
                                warn!(id, error = %e, "OS rejected hotkey");
                                false
                            }
                        };
                        let _ = reply.send(ok);
                    }
                    Ok(Command::Unbind { id }) => {
                        if let Some(hotkey) = hotkeys.remove(&id) {
                            ours.remove(&hotkey.id());
                            if let Err(e) = manager.unregister(hotkey) {
                                warn!(id, error = %e, "failed to unregister hotkey");
                            }
                        }
                    }
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        info!("hotkey manager thread stopped");
                        return;
                    }
                }
            }

            let events = GlobalHotKeyEvent::receiver();
            if let Ok(event) = events.recv_timeout(Duration::from_millis(50)) {
                if event.state != HotKeyState::Pressed {
                    continue;
                }
                if let Some(id) = ours.get(&event.id) {
                    if fired_tx.send(*id).is_err() {
                        error!("hotkey delivery channel closed");
                        return;
                    }
                }
            }
        }
    }

    fn to_modifiers(modifiers: Modifiers) -> HkModifiers {
        let mut out = HkModifiers::empty();
        if modifiers.contains(Modifiers::CONTROL) {
            out |= HkModifiers::CONTROL;
        }
        if modifiers.contains(Modifiers::ALT) {
            out |= HkModifiers::ALT;
        }
        if modifiers.contains(Modifiers::SHIFT) {
            out |= HkModifiers::SHIFT;
        }
        if modifiers.contains(Modifiers::WIN) {
            out |= HkModifiers::SUPER;
        }
        out
    }

    fn to_code(key: Key) -> Option<Code> {
        let code = match key {
            Key::A => Code::KeyA,
            Key::B => Code::KeyB,
            Key::C => Code::KeyC,
            Key::D => Code::KeyD,
            Key::E => Code::KeyE,
            Key::F => Code::KeyF,
            Key::G => Code::KeyG,
            Key::H => Code::KeyH,
            Key::I => Code::KeyI,
            Key::J => Code::KeyJ,
            Key::K => Code::KeyK,
            Key::L => Code::KeyL,
            Key::M => Code::KeyM,
            Key::N => Code::KeyN,
            Key::O => Code::KeyO,
            Key::P => Code::KeyP,
            Key::Q => Code::KeyQ,
            Key::R => Code::KeyR,
            Key::S => Code::KeyS,
            Key::T => Code::KeyT,
            Key::U => Code::KeyU,
            Key::V => Code::KeyV,
            Key::W => Code::KeyW,
            Key::X => Code::KeyX,
            Key::Y => Code::KeyY,
            Key::Z => Code::KeyZ,
            Key::D0 => Code::Digit0,
            Key::D1 => Code::Digit1,
            Key::D2 => Code::Digit2,
            Key::D3 => Code::Digit3,
            Key::D4 => Code::Digit4,
            Key::D5 => Code::Digit5,
            Key::D6 => Code::Digit6,
            Key::D7 => Code::Digit7,
            Key::D8 => Code::Digit8,
            Key::D9 => Code::Digit9,
            Key::F1 => Code::F1,
            Key::F2 => Code::F2,
            Key::F3 => Code::F3,
            Key::F4 => Code::F4,
            Key::F5 => Code::F5,
            Key::F6 => Code::F6,
            Key::F7 => Code::F7,
            Key::F8 => Code::F8,
            Key::F9 => Code::F9,
            Key::F10 => Code::F10,
            Key::F11 => Code::F11,
            Key::F12 => Code::F12,
            Key::Enter => Code::Enter,
            Key::Tab => Code::Tab,
            Key::Backspace => Code::Backspace,
            Key::Escape => Code::Escape,
            Key::Space => Code::Space,
            Key::Delete => Code::Delete,
            Key::Insert => Code::Insert,
            Key::Home => Code::Home,
            Key::End => Code::End,
            Key::PageUp => Code::PageUp,
            Key::PageDown => Code::PageDown,
            Key::Left => Code::ArrowLeft,
            Key::Right => Code::ArrowRight,
            Key::Up => Code::ArrowUp,
            Key::Down => Code::ArrowDown,
            _ => return None,
        };
        Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_rejects_duplicate_chord() {
        let (backend, _rx) = VirtualHotkeys::new();
        assert!(backend.bind(Modifiers::ALT, Key::F7, 9000));
        assert!(!backend.bind(Modifiers::ALT, Key::F7, 9001));
        assert!(backend.bind(Modifiers::ALT, Key::F8, 9001));

        backend.unbind(9000);
        assert!(backend.bind(Modifiers::ALT, Key::F7, 9002));
    }

    #[test]
    fn test_virtual_simulate_delivers_id() {
        let (backend, rx) = VirtualHotkeys::new();
        let chord = Chord::new(Modifiers::CONTROL | Modifiers::ALT, Key::F9);
        assert!(!backend.simulate(chord));

        backend.bind(chord.modifiers, chord.key, 9005);
        assert!(backend.simulate(chord));
        assert_eq!(rx.try_recv(), Ok(9005));

        backend.unbind(9005);
        assert!(!backend.simulate(chord));
    }
}
