//! Unix-socket broker between the controller and page contexts.
//!
//! Every accepted connection is registered as a broadcast target. Requests
//! read from a context are dispatched to the controller; its reply goes back
//! on the same outgoing channel that broadcasts use, so per-context ordering
//! is preserved.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::broadcast::ClientRegistry;
use crate::controller::ControllerEvent;
use crate::protocol::{LockStateReply, Request, ServerMessage, VerifyReply};

/// Depth of each context's outgoing queue.
const OUTGOING_QUEUE: usize = 16;

/// Accepts page contexts and shuttles messages between them and the controller.
pub struct Broker {
    registry: ClientRegistry,
    controller: mpsc::Sender<ControllerEvent>,
}

impl Broker {
    /// Create a broker over the given registry and controller channel.
    pub fn new(registry: ClientRegistry, controller: mpsc::Sender<ControllerEvent>) -> Self {
        Self {
            registry,
            controller,
        }
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn run(self, listener: UnixListener) -> anyhow::Result<()> {
        loop {
            let (stream, _addr) = listener.accept().await?;
            let registry = self.registry.clone();
            let controller = self.controller.clone();
            tokio::spawn(async move {
                handle_context(&registry, &controller, stream).await;
            });
        }
    }
}

/// Serve one page context until it disconnects.
async fn handle_context(
    registry: &ClientRegistry,
    controller: &mpsc::Sender<ControllerEvent>,
    stream: UnixStream,
) {
    let (reader, writer) = stream.into_split();

    let (out_tx, out_rx) = mpsc::channel::<ServerMessage>(OUTGOING_QUEUE);
    let id = registry.register(out_tx.clone());
    debug!("Context {id} connected ({} total)", registry.len());

    let writer_task = tokio::spawn(write_outgoing(writer, out_rx));

    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let request: Request = match serde_json::from_str(&line) {
                    Ok(request) => request,
                    Err(e) => {
                        // A bad line never takes the connection down.
                        warn!("Ignoring malformed request from context {id}: {e}");
                        continue;
                    }
                };

                let Some(reply) = dispatch(controller, request).await else {
                    debug!("Controller unavailable, dropping context {id}");
                    break;
                };
                if out_tx.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Read error from context {id}: {e}");
                break;
            }
        }
    }

    // Dropping the registry's sender ends the writer task.
    registry.unregister(id);
    drop(out_tx);
    let _ = writer_task.await;
    debug!("Context {id} disconnected ({} remaining)", registry.len());
}

/// Drain a context's outgoing queue onto its socket.
async fn write_outgoing(
    mut writer: tokio::net::unix::OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<ServerMessage>,
) {
    while let Some(message) = out_rx.recv().await {
        let Ok(mut line) = serde_json::to_string(&message) else {
            continue;
        };
        line.push('\n');
        trace!("Sending: {}", line.trim());
        if writer.write_all(line.as_bytes()).await.is_err() {
            // Context gone; remaining queued messages are best-effort anyway.
            return;
        }
    }
}

/// Forward a request to the controller and wait for its reply.
///
/// Returns `None` only if the controller is gone (shutdown).
async fn dispatch(
    controller: &mpsc::Sender<ControllerEvent>,
    request: Request,
) -> Option<ServerMessage> {
    match request {
        Request::VerifyPassword { password } => {
            let (tx, rx) = oneshot::channel();
            controller
                .send(ControllerEvent::Verify {
                    password,
                    reply: tx,
                })
                .await
                .ok()?;
            let ok = rx.await.ok()?;
            Some(ServerMessage::Verify(VerifyReply { ok }))
        }
        Request::IsLocked => {
            let (tx, rx) = oneshot::channel();
            controller
                .send(ControllerEvent::QueryLocked { reply: tx })
                .await
                .ok()?;
            let is_locked = rx.await.ok()?;
            Some(ServerMessage::LockState(LockStateReply { is_locked }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LockClient;
    use crate::protocol::OverlayCommand;
    use std::time::Duration;

    /// Stub controller: "hunter2" verifies, lock state is always false.
    fn spawn_stub_controller() -> mpsc::Sender<ControllerEvent> {
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ControllerEvent::Verify { password, reply } => {
                        let _ = reply.send(password == "hunter2");
                    }
                    ControllerEvent::QueryLocked { reply } => {
                        let _ = reply.send(false);
                    }
                    _ => {}
                }
            }
        });
        tx
    }

    async fn wait_for_registration(registry: &ClientRegistry) {
        for _ in 0..50 {
            if !registry.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("context never registered");
    }

    #[tokio::test]
    async fn test_requests_and_broadcasts_share_a_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idlelockd.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let registry = ClientRegistry::new();
        let broker = Broker::new(registry.clone(), spawn_stub_controller());
        tokio::spawn(broker.run(listener));

        let mut client = LockClient::connect(&path).await.unwrap();

        // Request/reply path.
        assert!(!client.is_locked().await.unwrap());
        assert!(!client.verify_password("wrong").await.unwrap());
        assert!(client.verify_password("hunter2").await.unwrap());

        // Broadcast path: the same connection is a registered target.
        let report = registry.broadcast(OverlayCommand::Lock);
        assert_eq!(report.delivered, 1);
        assert_eq!(
            client.next_message().await.unwrap(),
            ServerMessage::Command(OverlayCommand::Lock)
        );
    }

    #[tokio::test]
    async fn test_malformed_line_keeps_connection_alive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idlelockd.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let registry = ClientRegistry::new();
        let broker = Broker::new(registry.clone(), spawn_stub_controller());
        tokio::spawn(broker.run(listener));

        let mut client = LockClient::connect(&path).await.unwrap();
        // Not a valid request; the broker must ignore it.
        client.send_raw("{\"type\":\"noop\"}\n").await.unwrap();
        assert!(!client.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_disconnect_unregisters_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idlelockd.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let registry = ClientRegistry::new();
        let broker = Broker::new(registry.clone(), spawn_stub_controller());
        tokio::spawn(broker.run(listener));

        let client = LockClient::connect(&path).await.unwrap();
        wait_for_registration(&registry).await;
        assert_eq!(registry.len(), 1);

        drop(client);
        for _ in 0..50 {
            if registry.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("context never unregistered");
    }
}
