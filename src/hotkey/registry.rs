//! Hotkey registry: id allocation, callback table and the pause gate
//!
//! Two contexts touch the registry: the control context registers and
//! unregisters bindings, the delivery thread calls `dispatch`. The table and
//! the backend sit behind one mutex, so a binding and its OS grab always
//! change together. Callbacks are cloned out before they run, so a callback
//! may call back into the registry without deadlocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::DaemonEvent;

use super::backend::HotkeyBackend;
use super::keys::Chord;

/// First id handed out to ordinary bindings
pub const FIRST_HOTKEY_ID: u32 = 9000;

/// Privileged id for the pause toggle, below the ordinary range
pub const TOGGLE_HOTKEY_ID: u32 = FIRST_HOTKEY_ID - 1;

/// Callback run when a bound hotkey fires
pub type HotkeyCallback = Arc<dyn Fn() + Send + Sync>;

/// Errors from hotkey registration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("hotkey {chord} was rejected by the OS (already in use?)")]
    Rejected { chord: Chord, id: u32 },
}

struct Binding {
    chord: Chord,
    callback: HotkeyCallback,
}

struct BindingTable {
    backend: Box<dyn HotkeyBackend>,
    bindings: HashMap<u32, Binding>,
    next_id: u32,
    toggle: Option<Chord>,
}

impl BindingTable {
    fn id_of(&self, chord: Chord) -> Option<u32> {
        if self.toggle == Some(chord) {
            return Some(TOGGLE_HOTKEY_ID);
        }
        self.bindings
            .iter()
            .find(|(_, b)| b.chord == chord)
            .map(|(id, _)| *id)
    }
}

/// Owns every live hotkey binding and the pause flag
pub struct HotkeyRegistry {
    table: Mutex<BindingTable>,
    paused: AtomicBool,
    event_tx: broadcast::Sender<DaemonEvent>,
}

impl HotkeyRegistry {
    /// Create a registry on top of an OS hotkey backend
    pub fn new(backend: Box<dyn HotkeyBackend>, event_tx: broadcast::Sender<DaemonEvent>) -> Self {
        Self {
            table: Mutex::new(BindingTable {
                backend,
                bindings: HashMap::new(),
                next_id: FIRST_HOTKEY_ID,
                toggle: None,
            }),
            paused: AtomicBool::new(false),
            event_tx,
        }
    }

    /// Bind `chord` to `callback`. On rejection the allocated id is
    /// discarded and the table is left untouched.
    pub fn register<F>(&self, chord: Chord, callback: F) -> Result<u32, RegisterError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut table = self.table();
        let id = table.next_id;
        table.next_id += 1;

        if !table.backend.bind(chord.modifiers, chord.key, id) {
            warn!(%chord, id, "hotkey registration rejected");
            return Err(RegisterError::Rejected { chord, id });
        }

        table.bindings.insert(
            id,
            Binding {
                chord,
                callback: Arc::new(callback),
            },
        );
        info!(%chord, id, "hotkey registered");
        Ok(id)
    }

    /// Bind the privileged pause toggle, replacing any previous toggle
    /// chord. If the new chord is rejected the previous one stays bound.
    pub fn register_toggle(&self, chord: Chord) -> Result<(), RegisterError> {
        let mut table = self.table();
        let previous = table.toggle.take();
        if previous.is_some() {
            table.backend.unbind(TOGGLE_HOTKEY_ID);
        }

        if table.backend.bind(chord.modifiers, chord.key, TOGGLE_HOTKEY_ID) {
            table.toggle = Some(chord);
            info!(%chord, "pause toggle registered");
            return Ok(());
        }

        warn!(%chord, "pause toggle registration rejected");
        if let Some(previous) = previous {
            if table.backend.bind(previous.modifiers, previous.key, TOGGLE_HOTKEY_ID) {
                table.toggle = Some(previous);
                debug!(chord = %previous, "previous pause toggle restored");
            } else {
                warn!(chord = %previous, "previous pause toggle could not be restored");
            }
        }
        Err(RegisterError::Rejected {
            chord,
            id: TOGGLE_HOTKEY_ID,
        })
    }

    /// Unbind everything, including the toggle, and reset id allocation
    pub fn unregister_all(&self) {
        let mut table = self.table();
        let table = &mut *table;

        for id in table.bindings.keys() {
            table.backend.unbind(*id);
        }
        if table.toggle.take().is_some() {
            table.backend.unbind(TOGGLE_HOTKEY_ID);
        }

        let count = table.bindings.len();
        table.bindings.clear();
        table.next_id = FIRST_HOTKEY_ID;

        info!(count, "all hotkeys unregistered");
    }

    /// Handle a fired hotkey. Called synchronously from the delivery thread.
    ///
    /// Returns true if the event was handled, including ordinary hotkeys
    /// swallowed while paused. Unknown ids return false.
    pub fn dispatch(&self, id: u32) -> bool {
        if id == TOGGLE_HOTKEY_ID {
            let paused = !self.paused.fetch_xor(true, Ordering::SeqCst);
            info!(paused, "pause toggled by hotkey");
            self.notify_pause(paused);
            return true;
        }

        let callback = match self.table().bindings.get(&id) {
            Some(binding) => Arc::clone(&binding.callback),
            None => {
                debug!(id, "ignoring unknown hotkey id");
                return false;
            }
        };

        if self.is_paused() {
            debug!(id, "hotkey suppressed while paused");
            return true;
        }

        debug!(id, "dispatching hotkey");
        callback();
        true
    }

    /// Fire `chord` as if the user pressed it
    ///
    /// Backends that can simulate presses deliver it through their own
    /// channel; otherwise the bound id is dispatched directly. Returns false
    /// when nothing is bound to `chord`.
    pub fn press(&self, chord: Chord) -> bool {
        let id = {
            let table = self.table();
            if table.backend.simulate(chord) {
                debug!(%chord, "simulated hotkey press");
                return true;
            }
            table.id_of(chord)
        };

        match id {
            Some(id) => self.dispatch(id),
            None => false,
        }
    }

    /// Whether ordinary hotkeys are currently suppressed
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Set the pause flag, notifying observers only on change
    pub fn set_paused(&self, paused: bool) {
        if self.paused.swap(paused, Ordering::SeqCst) != paused {
            info!(paused, "pause state changed");
            self.notify_pause(paused);
        }
    }

    /// Flip the pause flag and return the new value
    pub fn toggle_pause(&self) -> bool {
        let paused = !self.paused.fetch_xor(true, Ordering::SeqCst);
        info!(paused, "pause toggled");
        self.notify_pause(paused);
        paused
    }

    /// Snapshot of ordinary bindings, sorted by id
    pub fn bindings(&self) -> Vec<(u32, Chord)> {
        let mut out: Vec<(u32, Chord)> = self
            .table()
            .bindings
            .iter()
            .map(|(id, b)| (*id, b.chord))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Chord bound to the pause toggle, if any
    pub fn toggle_chord(&self) -> Option<Chord> {
        self.table().toggle
    }

    /// Subscribe to pause and playback events
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.event_tx.subscribe()
    }

    fn notify_pause(&self, paused: bool) {
        // No receivers is fine
        let _ = self.event_tx.send(DaemonEvent::PauseChanged { paused });
    }

    fn table(&self) -> MutexGuard<'_, BindingTable> {
        // Callbacks never run under this lock
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::backend::VirtualHotkeys;
    use crate::hotkey::keys::{Key, Modifiers};
    use std::sync::atomic::AtomicUsize;

    fn create_registry() -> (HotkeyRegistry, broadcast::Receiver<DaemonEvent>) {
        let (tx, rx) = broadcast::channel(16);
        let (backend, _fired) = VirtualHotkeys::new();
        (HotkeyRegistry::new(Box::new(backend), tx), rx)
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn chord(key: Key) -> Chord {
        Chord::new(Modifiers::CONTROL | Modifiers::ALT, key)
    }

    #[test]
    fn test_ids_are_monotonic_from_threshold() {
        let (registry, _) = create_registry();
        assert_eq!(registry.register(chord(Key::F7), || {}), Ok(9000));
        assert_eq!(registry.register(chord(Key::F8), || {}), Ok(9001));
    }

    #[test]
    fn test_duplicate_rejected_by_backend() {
        let (registry, _) = create_registry();
        let first = registry.register(chord(Key::F7), || {}).unwrap();

        let second = registry.register(chord(Key::F7), || {});
        assert!(matches!(second, Err(RegisterError::Rejected { id: 9001, .. })));
        assert_eq!(registry.bindings(), vec![(first, chord(Key::F7))]);

        // The rejected id is burnt, not reused
        assert_eq!(registry.register(chord(Key::F9), || {}), Ok(9002));
    }

    #[test]
    fn test_dispatch_invokes_callback() {
        let (registry, _) = create_registry();
        let (count, callback) = counter();
        let id = registry.register(chord(Key::F7), callback).unwrap();

        assert!(registry.dispatch(id));
        assert!(registry.dispatch(id));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_id_ignored() {
        let (registry, _) = create_registry();
        assert!(!registry.dispatch(12345));
    }

    #[test]
    fn test_toggle_gates_dispatch() {
        let (registry, mut events) = create_registry();
        let (count, callback) = counter();
        let id = registry.register(chord(Key::F7), callback).unwrap();
        registry.register_toggle(chord(Key::F12)).unwrap();

        assert!(registry.dispatch(TOGGLE_HOTKEY_ID));
        assert!(registry.is_paused());
        assert_eq!(events.try_recv().unwrap(), DaemonEvent::PauseChanged { paused: true });

        // Suppressed but still handled
        assert!(registry.dispatch(id));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // The toggle itself always runs while paused
        assert!(registry.dispatch(TOGGLE_HOTKEY_ID));
        assert!(!registry.is_paused());
        assert_eq!(events.try_recv().unwrap(), DaemonEvent::PauseChanged { paused: false });

        assert!(registry.dispatch(id));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_paused_notifies_only_on_change() {
        let (registry, mut events) = create_registry();
        registry.set_paused(false);
        assert!(events.try_recv().is_err());

        registry.set_paused(true);
        registry.set_paused(true);
        assert_eq!(events.try_recv().unwrap(), DaemonEvent::PauseChanged { paused: true });
        assert!(events.try_recv().is_err());

        assert!(!registry.toggle_pause());
    }

    #[test]
    fn test_unregister_all_resets() {
        let (registry, _) = create_registry();
        let (count, callback) = counter();
        let id = registry.register(chord(Key::F7), callback).unwrap();
        registry.register(chord(Key::F8), || {}).unwrap();
        registry.register_toggle(chord(Key::F12)).unwrap();

        registry.unregister_all();
        assert!(registry.bindings().is_empty());
        assert_eq!(registry.toggle_chord(), None);
        assert!(!registry.dispatch(id));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Counter restarts and the chords are free again at the OS level
        assert_eq!(registry.register(chord(Key::F7), || {}), Ok(9000));
        assert!(registry.register_toggle(chord(Key::F12)).is_ok());
    }

    #[test]
    fn test_press_dispatches_by_chord() {
        let (registry, _) = create_registry();
        let (count, callback) = counter();
        registry.register(chord(Key::F7), callback).unwrap();
        registry.register_toggle(chord(Key::F12)).unwrap();

        assert!(registry.press(chord(Key::F7)));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(registry.press(chord(Key::F12)));
        assert!(registry.is_paused());

        assert!(!registry.press(chord(Key::F9)));
    }

    #[test]
    fn test_press_goes_through_simulating_backend() {
        let (tx, _rx) = broadcast::channel(16);
        let (backend, fired) = VirtualHotkeys::new();
        let registry = HotkeyRegistry::new(Box::new(backend), tx);
        let (count, callback) = counter();
        let id = registry.register(chord(Key::F7), callback).unwrap();

        assert!(registry.press(chord(Key::F7)));
        assert_eq!(fired.try_recv(), Ok(id));
        // Delivery is left to the listener
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rejected_toggle_keeps_previous() {
        let (registry, _) = create_registry();
        registry.register(chord(Key::F7), || {}).unwrap();
        let toggle = Chord::new(Modifiers::CONTROL | Modifiers::SHIFT, Key::F12);
        registry.register_toggle(toggle).unwrap();

        assert!(registry.register_toggle(chord(Key::F7)).is_err());
        assert_eq!(registry.toggle_chord(), Some(toggle));

        // Still grabbed at the OS level and still dispatching
        assert!(registry.register(toggle, || {}).is_err());
        assert!(registry.dispatch(TOGGLE_HOTKEY_ID));
        assert!(registry.is_paused());
    }

    /// Records the ids the backend currently holds
    struct SharedHotkeys(Arc<Mutex<HashMap<u32, Chord>>>);

    impl HotkeyBackend for SharedHotkeys {
        fn bind(&self, modifiers: Modifiers, key: Key, id: u32) -> bool {
            let mut bound = self.0.lock().unwrap();
            if bound.contains_key(&id) {
                return false;
            }
            bound.insert(id, Chord::new(modifiers, key));
            true
        }

        fn unbind(&self, id: u32) {
            self.0.lock().unwrap().remove(&id);
        }
    }

    #[test]
    fn test_rebind_races_keep_backend_in_sync() {
        let (tx, _rx) = broadcast::channel(16);
        let grabbed = Arc::new(Mutex::new(HashMap::new()));
        let registry = Arc::new(HotkeyRegistry::new(
            Box::new(SharedHotkeys(Arc::clone(&grabbed))),
            tx,
        ));

        let workers: Vec<_> = (0..4)
            .map(|n| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        if (i + n) % 7 == 0 {
                            registry.unregister_all();
                        } else {
                            let _ = registry.register(chord(Key::F7), || {});
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let mut table: Vec<u32> = registry.bindings().into_iter().map(|(id, _)| id).collect();
        let mut held: Vec<u32> = grabbed.lock().unwrap().keys().copied().collect();
        table.sort_unstable();
        held.sort_unstable();
        assert_eq!(table, held);
    }

    #[test]
    fn test_callback_may_reenter_registry() {
        let (tx, _rx) = broadcast::channel(16);
        let (backend, _fired) = VirtualHotkeys::new();
        let registry = Arc::new(HotkeyRegistry::new(Box::new(backend), tx));

        let weak = Arc::downgrade(&registry);
        let id = registry
            .register(chord(Key::F7), move || {
                if let Some(registry) = weak.upgrade() {
                    registry.set_paused(true);
                    let _ = registry.bindings();
                }
            })
            .unwrap();

        assert!(registry.dispatch(id));
        assert!(registry.is_paused());
    }
}
