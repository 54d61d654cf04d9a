//! Configuration loading and defaults for idlelockd.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Built-in default password, used until the user configures one.
pub const DEFAULT_PASSWORD: &str = "1234";

/// Built-in default inactivity threshold in minutes.
pub const DEFAULT_IDLE_MINUTES: u64 = 5;

/// Main configuration for idlelockd.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Password required to unlock the session (default: "1234").
    ///
    /// Stored and compared in plaintext, matching the original behavior.
    pub password: String,

    /// Minutes of inactivity before the lock countdown starts (default: 5).
    /// Values below 1 are clamped up.
    pub idle_minutes: u64,

    /// Interval between logind idle polls in seconds (default: 10).
    pub idle_check_interval_seconds: u64,

    /// Path to the daemon's Unix socket.
    /// If unset, uses $XDG_RUNTIME_DIR/idlelockd.sock.
    pub socket_path: Option<PathBuf>,

    /// Command spawned once when the session locks (e.g. a lock screen UI).
    pub lock_screen_command: Option<String>,

    /// Command spawned by a watch client when its overlay should appear.
    pub overlay_show_command: Option<String>,

    /// Command spawned by a watch client when its overlay should go away.
    pub overlay_hide_command: Option<String>,

    /// Dry run mode: log commands instead of executing.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            password: DEFAULT_PASSWORD.to_string(),
            idle_minutes: DEFAULT_IDLE_MINUTES,
            idle_check_interval_seconds: 10,
            socket_path: None,
            lock_screen_command: None,
            overlay_show_command: None,
            overlay_hide_command: None,
            dry_run: false,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// The countdown length in seconds, with the >= 1 minute floor applied.
    pub fn idle_threshold_seconds(&self) -> u64 {
        if self.idle_minutes == 0 {
            warn!("idle_minutes must be at least 1, clamping");
        }
        self.idle_minutes.max(1).saturating_mul(60)
    }

    /// Resolve the socket path, falling back to the runtime directory.
    pub fn resolve_socket_path(&self) -> PathBuf {
        if let Some(ref path) = self.socket_path {
            return path.clone();
        }
        match env::var("XDG_RUNTIME_DIR") {
            Ok(dir) => PathBuf::from(dir).join("idlelockd.sock"),
            Err(_) => env::temp_dir().join("idlelockd.sock"),
        }
    }
}

/// Handle to the persisted settings.
///
/// The controller re-reads settings through this on every transition decision
/// and never writes them, so configuration changes take effect on the next
/// event without a restart.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: Option<PathBuf>,
}

impl SettingsStore {
    /// Create a store. `path` of `None` means the default config location.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// The config file path this store reads from, if one can be resolved.
    fn resolved_path(&self) -> Option<PathBuf> {
        if let Some(ref path) = self.path {
            return Some(path.clone());
        }
        dirs::config_dir().map(|dir| dir.join("idlelockd").join("config.toml"))
    }

    /// Read the current settings.
    ///
    /// A missing, unreadable, or unparseable file degrades to built-in
    /// defaults; a settings read failure never fails a transition.
    pub fn load(&self) -> Config {
        let Some(path) = self.resolved_path() else {
            return Config::default();
        };
        if !path.exists() {
            return Config::default();
        }
        match Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Falling back to default settings: {e:#}");
                Config::default()
            }
        }
    }

    /// Write the default configuration on first run.
    ///
    /// An existing file is never touched, so user configuration survives
    /// restarts; absent keys already fall back to defaults on read.
    pub fn install_defaults(&self) -> Result<()> {
        let Some(path) = self.resolved_path() else {
            return Ok(());
        };
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir: {}", parent.display()))?;
        }
        let body = toml::to_string_pretty(&Config::default())
            .context("Failed to serialize default config")?;
        std::fs::write(&path, body)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        info!("Installed default configuration at {}", path.display());
        Ok(())
    }
}
