//! Lock screen launching and the interactive unlock prompt.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::client::LockClient;
use crate::config::Config;

/// Launches the configured lock screen UI when the session locks.
#[derive(Debug, Clone)]
pub struct LockScreenLauncher {
    command: Option<String>,
    dry_run: bool,
}

impl LockScreenLauncher {
    /// Create a launcher for the given command.
    pub fn new(command: Option<String>, dry_run: bool) -> Self {
        Self { command, dry_run }
    }

    /// Create a launcher from config.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.lock_screen_command.clone(), config.dry_run)
    }

    /// Spawn the lock screen command, fire-and-forget.
    ///
    /// A spawn failure is logged and swallowed: the session is already locked
    /// at this point and the unlock path does not depend on the UI process.
    pub fn launch(&self) {
        let Some(ref command) = self.command else {
            debug!("No lock screen command configured");
            return;
        };

        if self.dry_run {
            info!("[DRY RUN] Would execute lock screen: {command}");
            return;
        }

        debug!("Launching lock screen: {command}");
        match Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .spawn()
        {
            Ok(_child) => {}
            Err(e) => warn!("Failed to launch lock screen: {e}"),
        }
    }
}

/// Interactive unlock prompt: read password attempts from the terminal and
/// submit them until one verifies. Enter submits; any number of attempts is
/// permitted.
pub async fn run_prompt(client: &mut LockClient) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout
            .write_all(b"Password: ")
            .await
            .context("Failed to write prompt")?;
        stdout.flush().await.context("Failed to flush prompt")?;

        let Some(candidate) = lines.next_line().await.context("Failed to read input")? else {
            anyhow::bail!("Input closed before the session was unlocked");
        };

        if client.verify_password(&candidate).await? {
            println!("Unlocked.");
            return Ok(());
        }

        println!("Incorrect password");
    }
}
