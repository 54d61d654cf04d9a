//! Best-effort fan-out to connected page contexts.
//!
//! The registry holds one outgoing channel per connected context. Broadcasts
//! iterate a snapshot taken at call time, so contexts that connect or
//! disconnect mid-broadcast never block or fail the fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::protocol::{OverlayCommand, ServerMessage};

/// Identifier for a connected page context.
pub type ClientId = u64;

/// Outcome of a broadcast. Individual delivery failures are recorded here,
/// never propagated: the broadcast as a whole cannot fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastReport {
    /// Contexts the command was handed to.
    pub delivered: usize,
    /// Contexts that were unreachable and skipped.
    pub skipped: usize,
}

/// Registry of currently connected page contexts.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<Mutex<HashMap<ClientId, mpsc::Sender<ServerMessage>>>>,
    next_id: Arc<AtomicU64>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context's outgoing channel, returning its id.
    pub fn register(&self, tx: mpsc::Sender<ServerMessage>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients
            .lock()
            .expect("client registry lock poisoned")
            .insert(id, tx);
        id
    }

    /// Remove a context after disconnect.
    pub fn unregister(&self, id: ClientId) {
        self.clients
            .lock()
            .expect("client registry lock poisoned")
            .remove(&id);
    }

    /// Number of currently registered contexts.
    pub fn len(&self) -> usize {
        self.clients
            .lock()
            .expect("client registry lock poisoned")
            .len()
    }

    /// Whether no contexts are connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of current targets. Taken fresh for every broadcast so
    /// closed contexts do not linger in the target set.
    fn snapshot(&self) -> Vec<(ClientId, mpsc::Sender<ServerMessage>)> {
        self.clients
            .lock()
            .expect("client registry lock poisoned")
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect()
    }

    /// Send an overlay command to every connected context, best-effort.
    ///
    /// Never blocks: a context whose outgoing queue is full (stalled, not
    /// draining its socket) is skipped just like a closed one, so a single
    /// bad context cannot hold up delivery to the others.
    pub fn broadcast(&self, command: OverlayCommand) -> BroadcastReport {
        let targets = self.snapshot();
        let mut report = BroadcastReport::default();

        for (id, tx) in targets {
            match tx.try_send(ServerMessage::Command(command)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!("Context {id} not draining its queue, skipping");
                    report.skipped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    // Context went away between snapshot and send; skip it.
                    debug!("Context {id} unreachable, skipping");
                    report.skipped += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_all_contexts() {
        let registry = ClientRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        registry.register(tx_a);
        registry.register(tx_b);

        let report = registry.broadcast(OverlayCommand::Lock);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.skipped, 0);

        assert_eq!(
            rx_a.recv().await,
            Some(ServerMessage::Command(OverlayCommand::Lock))
        );
        assert_eq!(
            rx_b.recv().await,
            Some(ServerMessage::Command(OverlayCommand::Lock))
        );
    }

    #[tokio::test]
    async fn test_unreachable_context_is_skipped() {
        let registry = ClientRegistry::new();
        let (tx_gone, rx_gone) = mpsc::channel(4);
        let (tx_live, mut rx_live) = mpsc::channel(4);
        registry.register(tx_gone);
        registry.register(tx_live);

        // Simulate a closed context without unregistering it.
        drop(rx_gone);

        let report = registry.broadcast(OverlayCommand::Unlock);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);

        assert_eq!(
            rx_live.recv().await,
            Some(ServerMessage::Command(OverlayCommand::Unlock))
        );
    }

    #[tokio::test]
    async fn test_stalled_context_does_not_block_others() {
        let registry = ClientRegistry::new();

        // A context that stopped draining its queue: capacity 1, already full.
        let (tx_stalled, _rx_stalled) = mpsc::channel(1);
        tx_stalled
            .try_send(ServerMessage::Command(OverlayCommand::Lock))
            .unwrap();
        let (tx_live, mut rx_live) = mpsc::channel(4);
        registry.register(tx_stalled);
        registry.register(tx_live);

        let report = registry.broadcast(OverlayCommand::Unlock);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);

        assert_eq!(
            rx_live.recv().await,
            Some(ServerMessage::Command(OverlayCommand::Unlock))
        );
    }

    #[tokio::test]
    async fn test_unregister_shrinks_target_set() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let id = registry.register(tx);
        assert_eq!(registry.len(), 1);

        registry.unregister(id);
        assert!(registry.is_empty());

        let report = registry.broadcast(OverlayCommand::Lock);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.skipped, 0);
    }
}
