//! Per-context overlay presentation.
//!
//! Each watch client owns one presenter that mirrors the controller's lock
//! state onto a pluggable surface. Show and hide are idempotent: duplicate or
//! out-of-order broadcast commands are harmless.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::protocol::OverlayCommand;

/// Something that can render a blocking overlay for this context.
pub trait OverlaySurface {
    /// Put the overlay up.
    fn show(&mut self) -> Result<()>;
    /// Take the overlay down.
    fn hide(&mut self) -> Result<()>;
}

/// Surface that shells out to configured commands, fire-and-forget.
#[derive(Debug)]
pub struct CommandSurface {
    show_command: Option<String>,
    hide_command: Option<String>,
    dry_run: bool,
}

impl CommandSurface {
    /// Create a surface from config, with an optional dry-run override.
    pub fn from_config(config: &Config, dry_run: bool) -> Self {
        Self {
            show_command: config.overlay_show_command.clone(),
            hide_command: config.overlay_hide_command.clone(),
            dry_run: dry_run || config.dry_run,
        }
    }

    fn run(&self, command: &Option<String>, what: &str) -> Result<()> {
        let Some(command) = command else {
            debug!("No overlay {what} command configured");
            return Ok(());
        };

        if self.dry_run {
            info!("[DRY RUN] Would execute overlay {what}: {command}");
            return Ok(());
        }

        Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn overlay {what} command"))?;
        Ok(())
    }
}

impl OverlaySurface for CommandSurface {
    fn show(&mut self) -> Result<()> {
        self.run(&self.show_command, "show")
    }

    fn hide(&mut self) -> Result<()> {
        self.run(&self.hide_command, "hide")
    }
}

/// Tracks this context's lock flag and drives the surface.
#[derive(Debug)]
pub struct OverlayPresenter<S> {
    surface: S,
    locked: bool,
}

impl<S: OverlaySurface> OverlayPresenter<S> {
    /// Create a presenter with the overlay hidden.
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            locked: false,
        }
    }

    /// Whether this context currently shows its overlay.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Apply a broadcast command.
    pub fn apply(&mut self, command: OverlayCommand) {
        match command {
            OverlayCommand::Lock => self.show_overlay(),
            OverlayCommand::Unlock => self.hide_overlay(),
        }
    }

    /// Synchronize to a queried lock state, for contexts that join late.
    pub fn sync(&mut self, locked: bool) {
        if locked {
            self.show_overlay();
        } else {
            self.hide_overlay();
        }
    }

    fn show_overlay(&mut self) {
        if self.locked {
            debug!("Overlay already shown");
            return;
        }
        match self.surface.show() {
            Ok(()) => {
                info!("Overlay shown");
                self.locked = true;
            }
            Err(e) => warn!("Failed to show overlay: {e:#}"),
        }
    }

    fn hide_overlay(&mut self) {
        if !self.locked {
            return;
        }
        match self.surface.hide() {
            Ok(()) => {
                info!("Overlay hidden");
                self.locked = false;
            }
            Err(e) => warn!("Failed to hide overlay: {e:#}"),
        }
    }
}
