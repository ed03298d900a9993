//! Events module for pause and playback notifications
//!
//! Observers (the IPC server, the log loop in `main`) receive these over a
//! `tokio::sync::broadcast` channel shared by the hotkey registry and the
//! playback engine.

use serde::{Deserialize, Serialize};

use crate::typing::{Outcome, TypingMode};

/// Events emitted by the registry and the playback engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonEvent {
    /// Hotkey dispatch was paused or resumed
    PauseChanged {
        paused: bool,
    },

    /// A playback session was admitted and started
    SessionStarted {
        session: u64,
        mode: TypingMode,
        /// Character offset the session started from
        start_index: usize,
    },

    /// A playback session reached a terminal state
    SessionFinished {
        session: u64,
        outcome: Outcome,
        /// Characters consumed when the session ended
        progress: usize,
        /// Units whose injection failed after all retries
        soft_failures: usize,
    },
}

impl std::fmt::Display for DaemonEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonEvent::PauseChanged { paused: true } => write!(f, "PAUSED"),
            DaemonEvent::PauseChanged { paused: false } => write!(f, "RESUMED"),
            DaemonEvent::SessionStarted {
                session,
                mode,
                start_index,
            } => write!(f, "SESSION_STARTED #{} ({} from {})", session, mode, start_index),
            DaemonEvent::SessionFinished {
                session,
                outcome,
                progress,
                soft_failures,
            } => write!(
                f,
                "SESSION_FINISHED #{} ({} at {}, {} soft failures)",
                session, outcome, progress, soft_failures
            ),
        }
    }
}
