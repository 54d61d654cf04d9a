//! Client connection to the daemon socket.
//!
//! Used by the watch, unlock, and status subcommands. One JSON message per
//! line in both directions.

use std::path::Path;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, trace};

use crate::protocol::{Request, ServerMessage};

/// Errors that can occur talking to the daemon.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to connect to daemon socket {path}: {source}")]
    ConnectionFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("Daemon disconnected")]
    Disconnected,

    #[error("Invalid message from daemon: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Socket i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A page context's connection to the daemon.
pub struct LockClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl LockClient {
    /// Connect to the daemon socket.
    pub async fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream =
            UnixStream::connect(path)
                .await
                .map_err(|e| ClientError::ConnectionFailed {
                    path: path.display().to_string(),
                    source: e,
                })?;
        debug!("Connected to daemon at {}", path.display());

        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    /// Send a request to the daemon.
    pub async fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Write a raw line to the daemon, bypassing request serialization.
    #[cfg(test)]
    pub(crate) async fn send_raw(&mut self, line: &str) -> Result<(), ClientError> {
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Read the next message from the daemon.
    ///
    /// Blocks until a message arrives; returns `Disconnected` on EOF.
    pub async fn next_message(&mut self) -> Result<ServerMessage, ClientError> {
        let Some(line) = self.lines.next_line().await? else {
            return Err(ClientError::Disconnected);
        };
        trace!("Received: {}", line.trim());
        Ok(serde_json::from_str(&line)?)
    }

    /// Submit a password attempt and wait for the verdict.
    ///
    /// Broadcast commands can interleave with the reply (this connection is
    /// itself a broadcast target), so commands are skipped while waiting.
    pub async fn verify_password(&mut self, password: &str) -> Result<bool, ClientError> {
        self.send(&Request::VerifyPassword {
            password: password.to_string(),
        })
        .await?;

        loop {
            match self.next_message().await? {
                ServerMessage::Verify(reply) => return Ok(reply.ok),
                other => trace!("Skipping interleaved message while waiting: {other:?}"),
            }
        }
    }

    /// Ask whether the session is currently locked.
    pub async fn is_locked(&mut self) -> Result<bool, ClientError> {
        self.send(&Request::IsLocked).await?;

        loop {
            match self.next_message().await? {
                ServerMessage::LockState(reply) => return Ok(reply.is_locked),
                other => trace!("Skipping interleaved message while waiting: {other:?}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OverlayCommand;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    /// Accept one connection and script the server side of it.
    async fn scripted_server(
        listener: UnixListener,
        expect: &'static str,
        replies: &'static [&'static str],
    ) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        let received = String::from_utf8_lossy(&buf[..n]).to_string();
        assert_eq!(received.trim(), expect);
        for reply in replies {
            stream
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_is_locked_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(scripted_server(
            listener,
            r#"{"type":"isLocked"}"#,
            &[r#"{"isLocked":true}"#],
        ));

        let mut client = LockClient::connect(&path).await.unwrap();
        assert!(client.is_locked().await.unwrap());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_skips_interleaved_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();
        // The unlock broadcast reaches this connection before the reply does.
        let server = tokio::spawn(scripted_server(
            listener,
            r#"{"type":"verifyPassword","password":"1234"}"#,
            &[r#"{"action":"unlock"}"#, r#"{"ok":true}"#],
        ));

        let mut client = LockClient::connect(&path).await.unwrap();
        assert!(client.verify_password("1234").await.unwrap());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_next_message_parses_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"{\"action\":\"lock\"}\n").await.unwrap();
        });

        let mut client = LockClient::connect(&path).await.unwrap();
        assert_eq!(
            client.next_message().await.unwrap(),
            ServerMessage::Command(OverlayCommand::Lock)
        );
        assert!(matches!(
            client.next_message().await,
            Err(ClientError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let result = LockClient::connect(&dir.path().join("absent.sock")).await;
        assert!(matches!(result, Err(ClientError::ConnectionFailed { .. })));
    }
}
