//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::controller::Interrupted;
use crate::hotkey::ValidationResult;
use crate::typing::{EngineState, SessionReport, TypingMode};

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from a client to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Suppress or re-enable snippet hotkeys
    SetPaused { paused: bool },

    TogglePause,

    /// Play a snippet by name from the beginning
    Play { snippet: String },

    /// Continue the last cancelled session
    Resume,

    /// Cancel the running session
    Cancel,

    /// Check a hotkey string, optionally on behalf of an existing snippet
    ValidateHotkey {
        hotkey: String,
        #[serde(default)]
        snippet: Option<String>,
    },

    /// Fire a bound hotkey as if it had been pressed
    PressHotkey { hotkey: String },

    /// Switch this connection to event notifications
    Subscribe,
}

/// Responses from the daemon
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,

    Status(DaemonStatus),

    Paused { paused: bool },

    /// A session was started
    Playing {
        session: u64,
        mode: TypingMode,
        start_index: usize,
    },

    /// The running session was cancelled; `None` when nothing was running
    Cancelled {
        session: Option<u64>,
        report: Option<SessionReport>,
    },

    Validation(ValidationResult),

    /// The hotkey was handed to the registry
    Pressed { hotkey: String },

    /// Subscription confirmed; events follow on this connection
    Subscribed,

    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A bound snippet hotkey
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotkeyInfo {
    pub id: u32,
    pub chord: String,
}

/// Session currently playing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveSession {
    pub id: u64,
    pub mode: TypingMode,
    pub start_index: usize,
    pub progress: usize,
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    pub paused: bool,

    pub state: EngineState,

    pub session: Option<ActiveSession>,

    /// Cancelled session `resume` would continue
    pub interrupted: Option<Interrupted>,

    pub hotkeys: Vec<HotkeyInfo>,

    pub toggle_hotkey: Option<String>,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

/// Read one length-prefixed message body. `Ok(None)` on a clean disconnect
/// before the length prefix.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("message of {} bytes exceeds limit", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(msg)?;
    let len = (body.len() as u32).to_le_bytes();

    writer.write_all(&len).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}
