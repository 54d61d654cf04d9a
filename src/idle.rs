//! Idle detection via systemd-logind `DBus` interface.
//!
//! Polls the `IdleHint` and `LockedHint` properties of the current session
//! and reports state transitions to the lock controller.

use std::env;
use std::fmt;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;
use zbus::Connection;

/// `DBus` service and path for login1.
const LOGIND_SERVICE: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";

/// Host-reported user-activity classification for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionIdleState {
    /// The user is active.
    Active,
    /// The session has been idle past the compositor's idle hint.
    Idle,
    /// The host itself reports the session as locked.
    Locked,
}

impl fmt::Display for SessionIdleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Idle => write!(f, "idle"),
            Self::Locked => write!(f, "locked"),
        }
    }
}

/// Derive the session state from the two logind hints. `LockedHint` wins.
fn derive_state(idle_hint: bool, locked_hint: bool) -> SessionIdleState {
    if locked_hint {
        SessionIdleState::Locked
    } else if idle_hint {
        SessionIdleState::Idle
    } else {
        SessionIdleState::Active
    }
}

/// Idle monitor that polls systemd-logind and emits state transitions.
pub struct IdleMonitor {
    /// Where observed transitions are delivered.
    events: mpsc::Sender<SessionIdleState>,

    /// Poll interval.
    interval: Duration,
}

impl IdleMonitor {
    /// Create a new idle monitor.
    pub fn new(events: mpsc::Sender<SessionIdleState>, interval: Duration) -> Self {
        Self { events, interval }
    }

    /// Start the background polling task.
    ///
    /// If the logind session cannot be resolved, idle monitoring is disabled:
    /// the daemon keeps answering verify/isLocked but never locks on idleness.
    pub fn spawn(self) {
        tokio::spawn(async move {
            let session_path = match resolve_session_path().await {
                Ok(path) => path,
                Err(e) => {
                    error!("Failed to initialize idle monitor: {e:#}. Disabling idle lock.");
                    return;
                }
            };
            info!(
                "Idle monitor started on session {}, polling every {:?}",
                session_path, self.interval
            );
            self.run(&session_path).await;
        });
    }

    /// Poll loop. Sends a state only when it differs from the last observed one.
    async fn run(self, session_path: &str) {
        let mut last: Option<SessionIdleState> = None;

        loop {
            match poll_session_state(session_path).await {
                Ok(state) => {
                    if last == Some(state) {
                        trace!("Idle state: {state}");
                    } else {
                        if let Some(prev) = last {
                            debug!("Idle state changed: {prev} -> {state}");
                        }
                        last = Some(state);
                        if self.events.send(state).await.is_err() {
                            info!("Idle event receiver dropped, stopping monitor");
                            return;
                        }
                    }
                }
                Err(e) => {
                    // Transient DBus errors are logged, not fatal.
                    warn!("Failed to poll idle state: {e:#}");
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Resolve the session object path for the current session.
async fn resolve_session_path() -> Result<String> {
    let conn = Connection::system()
        .await
        .context("Failed to connect to system DBus")?;

    // First try XDG_SESSION_ID if available
    if let Ok(session_id) = env::var("XDG_SESSION_ID") {
        debug!("Using XDG_SESSION_ID: {}", session_id);

        const MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";

        let proxy = zbus::Proxy::new(&conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE)
            .await
            .context("Failed to create Manager proxy")?;

        let path: zbus::zvariant::OwnedObjectPath = proxy
            .call("GetSession", &(&session_id,))
            .await
            .context("GetSession call failed")?;

        return Ok(path.to_string());
    }

    // Fall back to getting sessions for current user
    debug!("XDG_SESSION_ID not set, trying to find current session");

    // Try "self" session - probe by reading IdleHint
    let self_path = format!("{LOGIND_PATH}/session/self");
    if get_session_flag(&conn, &self_path, "IdleHint").await.is_ok() {
        return Ok(self_path);
    }

    // Try "auto" session
    let auto_path = format!("{LOGIND_PATH}/session/auto");
    if get_session_flag(&conn, &auto_path, "IdleHint").await.is_ok() {
        return Ok(auto_path);
    }

    anyhow::bail!(
        "Could not resolve session path. Set XDG_SESSION_ID or ensure logind session is available."
    )
}

/// Read both hints and derive the current session state.
async fn poll_session_state(session_path: &str) -> Result<SessionIdleState> {
    let conn = Connection::system()
        .await
        .context("Failed to connect to system DBus")?;

    let idle = get_session_flag(&conn, session_path, "IdleHint").await?;
    let locked = get_session_flag(&conn, session_path, "LockedHint").await?;

    Ok(derive_state(idle, locked))
}

/// Get a boolean property from a logind session.
async fn get_session_flag(conn: &Connection, session_path: &str, property: &str) -> Result<bool> {
    const SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";
    const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

    let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, session_path, PROPERTIES_INTERFACE)
        .await
        .context("Failed to create Properties proxy")?;

    let value: zbus::zvariant::OwnedValue = proxy
        .call("Get", &(SESSION_INTERFACE, property))
        .await
        .with_context(|| format!("Failed to get {property} property"))?;

    let flag: bool = value
        .downcast_ref::<bool>()
        .map_err(|_| anyhow::anyhow!("{property} is not a boolean"))?;

    Ok(flag)
}
