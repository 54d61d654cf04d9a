//! idlelockd - inactivity lock daemon for logind sessions.
//!
//! Watches the current session for idleness, runs a grace countdown, then
//! locks: every connected page context is told to show its overlay and a lock
//! screen is launched. Unlocking requires the configured password.

mod broadcast;
mod client;
mod config;
mod controller;
mod countdown;
mod idle;
mod lockscreen;
mod overlay;
mod protocol;
mod server;

use crate::broadcast::ClientRegistry;
use crate::client::{ClientError, LockClient};
use crate::config::SettingsStore;
use crate::controller::{ControllerEvent, LockController};
use crate::idle::IdleMonitor;
use crate::lockscreen::LockScreenLauncher;
use crate::overlay::{CommandSurface, OverlayPresenter};
use crate::protocol::ServerMessage;
use crate::server::Broker;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Inactivity lock daemon for logind sessions.
///
/// Locks the session after a configurable idle period and keeps it locked
/// until the password verifies.
#[derive(Parser, Debug)]
#[command(name = "idlelockd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable dry-run mode (log external commands instead of running them).
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the lock daemon (the default).
    Daemon,
    /// Connect as a page context and mirror lock state onto the overlay.
    Watch,
    /// Prompt for the password and unlock the session.
    Unlock,
    /// Print whether the session is currently locked.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    let store = SettingsStore::new(args.config.clone());

    match args.command.unwrap_or(Command::Daemon) {
        Command::Daemon => run_daemon(&store, args.dry_run).await,
        Command::Watch => run_watch(&store, args.dry_run).await,
        Command::Unlock => run_unlock(&store).await,
        Command::Status => run_status(&store).await,
    }
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("idlelockd={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Run the daemon: idle monitor, controller, and socket broker.
async fn run_daemon(store: &SettingsStore, dry_run: bool) -> Result<()> {
    info!("idlelockd v{} starting", env!("CARGO_PKG_VERSION"));

    store
        .install_defaults()
        .context("Failed to install default configuration")?;

    let mut config = store.load();
    if dry_run {
        config.dry_run = true;
    }
    info!("Configuration loaded (dry_run={})", config.dry_run);

    let socket_path = config.resolve_socket_path();
    let listener = bind_socket(&socket_path)?;
    info!("Listening on {}", socket_path.display());

    let registry = ClientRegistry::new();
    let (events_tx, events_rx) = mpsc::channel(64);

    let controller = LockController::new(
        store.clone(),
        registry.clone(),
        events_tx.clone(),
        LockScreenLauncher::from_config(&config),
    );
    tokio::spawn(controller.run(events_rx));

    // Idle transitions flow into the controller's event channel.
    let (idle_tx, mut idle_rx) = mpsc::channel(16);
    IdleMonitor::new(
        idle_tx,
        Duration::from_secs(config.idle_check_interval_seconds),
    )
    .spawn();
    let idle_events = events_tx.clone();
    tokio::spawn(async move {
        while let Some(state) = idle_rx.recv().await {
            if idle_events
                .send(ControllerEvent::IdleChanged(state))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let broker = Broker::new(registry, events_tx);

    let result = tokio::select! {
        result = broker.run(listener) => result.context("Socket broker failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    if let Err(e) = std::fs::remove_file(&socket_path) {
        debug!("Could not remove socket file: {e}");
    }

    result
}

/// Bind the Unix socket, replacing a stale file from a previous run.
fn bind_socket(path: &Path) -> Result<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stale socket file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to remove stale socket file {}", path.display())
            });
        }
    }

    UnixListener::bind(path)
        .with_context(|| format!("Failed to bind socket {}", path.display()))
}

/// Run a page context: sync once on connect, then follow broadcasts.
///
/// Reconnects with backoff when the daemon goes away, re-syncing each time so
/// a context that joins while already locked still shows its overlay.
async fn run_watch(store: &SettingsStore, dry_run: bool) -> Result<()> {
    let config = store.load();
    let socket_path = config.resolve_socket_path();

    let mut presenter = OverlayPresenter::new(CommandSurface::from_config(&config, dry_run));

    const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
    const MAX_BACKOFF: Duration = Duration::from_secs(5);
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match LockClient::connect(&socket_path).await {
            Ok(mut client) => {
                backoff = INITIAL_BACKOFF;
                info!("Connected to daemon, syncing lock state");

                match stream_commands(&mut client, &mut presenter).await {
                    Err(ClientError::Disconnected) => warn!("Daemon disconnected"),
                    Err(e) => warn!("Connection error: {e}"),
                    Ok(()) => {}
                }
            }
            Err(e) => debug!("{e}"),
        }

        tokio::time::sleep(backoff).await;
        backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
    }
}

/// Sync the overlay, then apply commands until the connection breaks.
async fn stream_commands<S: overlay::OverlaySurface>(
    client: &mut LockClient,
    presenter: &mut OverlayPresenter<S>,
) -> Result<(), ClientError> {
    let locked = client.is_locked().await?;
    presenter.sync(locked);

    loop {
        match client.next_message().await? {
            ServerMessage::Command(command) => presenter.apply(command),
            other => debug!("Ignoring unexpected message: {other:?}"),
        }
    }
}

/// Prompt for the password until the session unlocks.
async fn run_unlock(store: &SettingsStore) -> Result<()> {
    let config = store.load();
    let mut client = LockClient::connect(&config.resolve_socket_path())
        .await
        .context("Is the daemon running?")?;

    lockscreen::run_prompt(&mut client).await
}

/// Print the current lock state.
async fn run_status(store: &SettingsStore) -> Result<()> {
    let config = store.load();
    let mut client = LockClient::connect(&config.resolve_socket_path())
        .await
        .context("Is the daemon running?")?;

    let locked = client.is_locked().await?;
    println!("{}", if locked { "locked" } else { "unlocked" });
    Ok(())
}
