//! Cancellable one-second countdown ticker.
//!
//! The controller owns at most one of these at a time; entering the counting
//! state cancels any prior instance before starting a new one.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::controller::ControllerEvent;

/// Handle to a running countdown tick task.
///
/// Each tick posts a [`ControllerEvent::Tick`] tagged with this countdown's
/// generation, so ticks from a cancelled instance that are already in flight
/// are ignored by the controller.
#[derive(Debug)]
pub struct Countdown {
    token: CancellationToken,
    generation: u64,
}

impl Countdown {
    /// Spawn the tick task. The first tick fires one second after start.
    pub fn start(generation: u64, events: mpsc::Sender<ControllerEvent>) -> Self {
        let token = CancellationToken::new();
        let tick_token = token.clone();

        tokio::spawn(async move {
            let mut ticker = time::interval_at(
                Instant::now() + Duration::from_secs(1),
                Duration::from_secs(1),
            );

            loop {
                tokio::select! {
                    () = tick_token.cancelled() => {
                        trace!("Countdown generation {generation} cancelled");
                        return;
                    }
                    _ = ticker.tick() => {
                        if events.send(ControllerEvent::Tick { generation }).await.is_err() {
                            // Controller gone, nothing left to tick for.
                            return;
                        }
                    }
                }
            }
        });

        Self { token, generation }
    }

    /// Generation this countdown was started with.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop the tick task.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
