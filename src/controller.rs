//! Lock controller state machine.
//!
//! Translates idle-state transitions into a grace countdown and a lock/unlock
//! decision. All state lives in a single [`LockController`] instance driven by
//! one event channel; handlers run to completion before the next event is
//! taken, so a transition and the settings read it performs are atomic with
//! respect to other events.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::broadcast::ClientRegistry;
use crate::config::SettingsStore;
use crate::countdown::Countdown;
use crate::idle::SessionIdleState;
use crate::lockscreen::LockScreenLauncher;
use crate::protocol::OverlayCommand;

/// Events the controller reacts to, in arrival order.
#[derive(Debug)]
pub enum ControllerEvent {
    /// The host idle state changed.
    IdleChanged(SessionIdleState),
    /// One second of the grace countdown elapsed.
    Tick { generation: u64 },
    /// A page context submitted a password attempt.
    Verify {
        password: String,
        reply: oneshot::Sender<bool>,
    },
    /// A page context asked whether the session is locked.
    QueryLocked { reply: oneshot::Sender<bool> },
}

/// Controller state. In-memory only: a daemon restart resets to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// User is active, nothing pending.
    Active,
    /// Idle detected, lock pending unless activity resumes.
    CountingDown { seconds_remaining: u64 },
    /// Session is locked until a password verifies.
    Locked,
}

/// The lock controller. Owns the state, the countdown, and the broadcast
/// decision; reads settings fresh on every transition and never writes them.
pub struct LockController {
    state: LockState,
    settings: SettingsStore,
    registry: ClientRegistry,
    lock_screen: LockScreenLauncher,

    /// Sender handed to countdown tick tasks.
    events: mpsc::Sender<ControllerEvent>,

    /// Live countdown, if any. At most one at a time.
    countdown: Option<Countdown>,

    /// Bumped on every countdown start and cancel; stale ticks are dropped.
    generation: u64,
}

impl LockController {
    /// Create a controller in the `Active` state.
    pub fn new(
        settings: SettingsStore,
        registry: ClientRegistry,
        events: mpsc::Sender<ControllerEvent>,
        lock_screen: LockScreenLauncher,
    ) -> Self {
        Self {
            state: LockState::Active,
            settings,
            registry,
            lock_screen,
            events,
            countdown: None,
            generation: 0,
        }
    }

    /// Process events until the channel closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ControllerEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle_event(event);
        }
        self.cancel_countdown();
        debug!("Controller event channel closed, stopping");
    }

    fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::IdleChanged(idle) => self.handle_idle_change(idle),
            ControllerEvent::Tick { generation } => self.handle_tick(generation),
            ControllerEvent::Verify { password, reply } => {
                let ok = self.verify_password(&password);
                let _ = reply.send(ok);
            }
            ControllerEvent::QueryLocked { reply } => {
                let _ = reply.send(self.state == LockState::Locked);
            }
        }
    }

    /// React to a host idle-state transition. Settings are re-read here so a
    /// changed threshold applies to the countdown being started.
    fn handle_idle_change(&mut self, idle: SessionIdleState) {
        match idle {
            SessionIdleState::Idle | SessionIdleState::Locked => {
                if self.state == LockState::Locked {
                    trace!("Already locked, ignoring {idle} event");
                    return;
                }
                let seconds = self.settings.load().idle_threshold_seconds();
                self.start_countdown(seconds);
            }
            SessionIdleState::Active => match self.state {
                LockState::CountingDown { .. } => {
                    self.cancel_countdown();
                    self.state = LockState::Active;
                    info!("User active again, lock countdown cancelled");
                }
                LockState::Locked => {
                    // Policy: activity alone never unlocks, only the password.
                    debug!("User active but session stays locked until password");
                }
                LockState::Active => {}
            },
        }
    }

    /// Cancel-and-replace: no two countdowns ever run concurrently.
    fn start_countdown(&mut self, seconds: u64) {
        self.cancel_countdown();
        self.generation += 1;
        self.countdown = Some(Countdown::start(self.generation, self.events.clone()));
        self.state = LockState::CountingDown {
            seconds_remaining: seconds,
        };
        info!("Idle detected, locking in {seconds}s unless activity resumes");
    }

    fn cancel_countdown(&mut self) {
        if let Some(countdown) = self.countdown.take() {
            trace!("Cancelling countdown generation {}", countdown.generation());
            countdown.cancel();
        }
        // Invalidate ticks from the cancelled instance that are already queued.
        self.generation += 1;
    }

    fn handle_tick(&mut self, generation: u64) {
        if generation != self.generation {
            trace!("Dropping stale tick from generation {generation}");
            return;
        }
        let LockState::CountingDown { seconds_remaining } = self.state else {
            return;
        };

        let remaining = seconds_remaining.saturating_sub(1);
        if remaining == 0 {
            self.lock();
        } else {
            trace!("Locking in {remaining}s");
            self.state = LockState::CountingDown {
                seconds_remaining: remaining,
            };
        }
    }

    /// Countdown reached zero: the only path into `Locked`.
    fn lock(&mut self) {
        self.cancel_countdown();
        self.state = LockState::Locked;

        let report = self.registry.broadcast(OverlayCommand::Lock);
        info!(
            "Session locked; lock sent to {} contexts ({} unreachable)",
            report.delivered, report.skipped
        );

        self.lock_screen.launch();
    }

    /// Compare a candidate against the stored password.
    ///
    /// Plain string equality, as configured. On success the controller
    /// returns to `Active` and broadcasts `unlock`; on failure only the
    /// caller learns, and the candidate value is never logged.
    fn verify_password(&mut self, candidate: &str) -> bool {
        let stored = self.settings.load().password;
        if candidate != stored {
            debug!("Password verification failed");
            return false;
        }

        self.cancel_countdown();
        self.state = LockState::Active;

        let report = self.registry.broadcast(OverlayCommand::Unlock);
        info!(
            "Session unlocked; unlock sent to {} contexts ({} unreachable)",
            report.delivered, report.skipped
        );
        if report.skipped > 0 {
            warn!("{} contexts missed the unlock command", report.skipped);
        }

        true
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> LockState {
        self.state
    }
}
