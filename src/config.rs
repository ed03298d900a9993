//! Configuration loading and management

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::snippets::Snippet;

/// Environment variable overriding the settings file location
pub const SETTINGS_ENV: &str = "AUTOTYPER_SETTINGS";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Settings file the snippets were read from
    pub settings_path: PathBuf,

    pub settings: Settings,
}

fn default_toggle_hotkey() -> Option<String> {
    Some("Ctrl+Shift+F12".to_string())
}

fn default_progress_every() -> usize {
    10
}

/// User settings, read from JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Chord for the pause toggle; `null` disables it
    #[serde(default = "default_toggle_hotkey")]
    pub toggle_hotkey: Option<String>,

    /// Fixed seed for human-like timing
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default = "default_progress_every")]
    pub progress_every: usize,

    #[serde(default)]
    pub snippets: Vec<Snippet>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            toggle_hotkey: default_toggle_hotkey(),
            seed: None,
            progress_every: default_progress_every(),
            snippets: Vec::new(),
        }
    }
}

impl Settings {
    /// Read settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(?path, "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        serde_json::from_str(&raw)
            .with_context(|| format!("invalid settings in {}", path.display()))
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = PathBuf::from(std::env::var("HOME").context("HOME is not set")?);
        let settings_path = match std::env::var_os(SETTINGS_ENV) {
            Some(path) => PathBuf::from(path),
            None => home.join(".config").join("autotyper").join("settings.json"),
        };
        Self::from_paths(&home, settings_path)
    }

    fn from_paths(home: &Path, settings_path: PathBuf) -> Result<Self> {
        let data_dir = home.join(".local").join("share").join("autotyper");
        let socket_path = data_dir.join("daemon.sock");
        let settings = Settings::load(&settings_path)?;

        Ok(Self {
            socket_path,
            data_dir,
            settings_path,
            settings,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}
