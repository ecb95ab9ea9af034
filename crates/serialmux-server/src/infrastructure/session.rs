//! Client session: one task per TCP connection.
//!
//! A session owns its socket and nothing else.  It moves complete lines from
//! the client into the outgoing queue and, on every poll tick, flushes the
//! client's mailbox back down the socket:
//!
//! ```text
//! loop {
//!     select! {
//!         line from client  ──► trim; empty? skip : submit
//!         EOF               ──► leave
//!         poll tick         ──► drain mailbox ──► write lines
//!     }
//! }
//! unregister
//! ```
//!
//! `FramedRead::next` is cancel-safe, so a tick that wins the `select!` never
//! loses a partially received line.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures_util::{SinkExt, StreamExt};
use serialmux_core::{ClientId, MailboxError, MailboxRegistry};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::domain::ServerConfig;
use crate::infrastructure::codec::LineCodec;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The client's registration vanished while the session was running.
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed its side of the connection.
    ClientClosed,
    /// The daemon is shutting down.
    Shutdown,
}

/// Registers a fresh client, serves `stream` until it closes, then
/// unregisters.
///
/// Unregistration runs on every exit path, including socket errors, so a
/// vanished client never leaves queued commands or a mailbox behind.
///
/// # Errors
///
/// [`SessionError`] if the socket fails or the registration is lost.
pub async fn run_session<S>(
    stream: S,
    peer: SocketAddr,
    registry: Arc<MailboxRegistry>,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) -> Result<SessionEnd, SessionError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let id = ClientId::new();
    registry.register(id)?;
    info!("session {peer}: registered as client {id}");

    let result = serve(stream, id, peer, &registry, &config, &running).await;

    if let Err(e) = registry.unregister(id) {
        warn!("session {peer}: {e}");
    }
    match &result {
        Ok(end) => info!("session {peer} (client {id}) ended: {end:?}"),
        Err(e) => warn!("session {peer} (client {id}) ended with error: {e}"),
    }
    result
}

async fn serve<S>(
    stream: S,
    id: ClientId,
    peer: SocketAddr,
    registry: &MailboxRegistry,
    config: &ServerConfig,
    running: &AtomicBool,
) -> Result<SessionEnd, SessionError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut lines = FramedRead::new(reader, LineCodec::new(config.max_line_length));
    let mut sink = FramedWrite::new(writer, LineCodec::new(config.max_line_length));

    let mut tick = interval(config.poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }
                    debug!("client {id} ({peer}) submitted {command:?}");
                    registry.submit(id, command)?;
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(SessionEnd::ClientClosed),
            },
            _ = tick.tick() => {
                if !running.load(Ordering::Relaxed) {
                    return Ok(SessionEnd::Shutdown);
                }
                let pending = registry.drain(id)?;
                if pending.is_empty() {
                    continue;
                }
                for message in pending {
                    sink.feed(message.into_payload()).await?;
                }
                SinkExt::<String>::flush(&mut sink).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialmux_core::Message;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::task::JoinHandle;

    struct Harness {
        registry: Arc<MailboxRegistry>,
        running: Arc<AtomicBool>,
        client: DuplexStream,
        session: JoinHandle<Result<SessionEnd, SessionError>>,
    }

    fn start_session() -> Harness {
        start_session_polling_every(ServerConfig::default().poll_interval)
    }

    fn start_session_polling_every(poll_interval: Duration) -> Harness {
        let registry = Arc::new(MailboxRegistry::new());
        let running = Arc::new(AtomicBool::new(true));
        let config = Arc::new(ServerConfig {
            max_line_length: 32,
            poll_interval,
            ..ServerConfig::default()
        });
        let (client, server) = tokio::io::duplex(1024);
        let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let session = tokio::spawn(run_session(
            server,
            peer,
            Arc::clone(&registry),
            config,
            Arc::clone(&running),
        ));
        Harness {
            registry,
            running,
            client,
            session,
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_session_registers_client() {
        let h = start_session();

        wait_for(|| h.registry.client_count() == 1).await;
    }

    #[tokio::test]
    async fn test_line_is_trimmed_and_submitted() {
        // Arrange
        let mut h = start_session();
        wait_for(|| h.registry.client_count() == 1).await;

        // Act
        h.client.write_all(b"  ping  \r\n").await.unwrap();
        wait_for(|| h.registry.outgoing_len() == 1).await;

        // Assert
        let message = h.registry.pop_outgoing().unwrap();
        assert_eq!(message.payload(), "ping");
        assert!(message.origin().client().is_some());
    }

    #[tokio::test]
    async fn test_blank_lines_are_not_submitted() {
        let mut h = start_session();
        wait_for(|| h.registry.client_count() == 1).await;

        h.client.write_all(b"\n   \n\t\nstatus\n").await.unwrap();
        wait_for(|| h.registry.outgoing_len() >= 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(h.registry.outgoing_len(), 1);
        assert_eq!(h.registry.pop_outgoing().unwrap().payload(), "status");
    }

    #[tokio::test]
    async fn test_overlong_line_is_dropped_and_session_continues() {
        let mut h = start_session();
        wait_for(|| h.registry.client_count() == 1).await;

        let long = "x".repeat(100);
        h.client.write_all(format!("{long}\nping\n").as_bytes()).await.unwrap();
        wait_for(|| h.registry.outgoing_len() == 1).await;

        assert_eq!(h.registry.pop_outgoing().unwrap().payload(), "ping");
        assert_eq!(h.registry.client_count(), 1);
    }

    #[tokio::test]
    async fn test_mailbox_is_flushed_to_client() {
        // Arrange
        let h = start_session();
        wait_for(|| h.registry.client_count() == 1).await;
        let mut reader = BufReader::new(h.client);

        // Act
        h.registry.deliver_broadcast(Message::broadcast("alert fire"));
        h.registry.deliver_broadcast(Message::broadcast("alert smoke"));

        // Assert
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "alert fire\n");
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "alert smoke\n");
    }

    #[tokio::test]
    async fn test_whole_mailbox_is_written_in_one_tick() {
        // Arrange: ticks far apart, so a second tick cannot hide a partial write
        let h = start_session_polling_every(Duration::from_millis(500));
        wait_for(|| h.registry.client_count() == 1).await;
        let mut reader = BufReader::new(h.client);

        // Act
        for n in 1..=3 {
            h.registry.deliver_broadcast(Message::broadcast(format!("event {n}")));
        }
        let mut first = String::new();
        reader.read_line(&mut first).await.unwrap();

        // Assert: the rest of the batch is already on the wire
        let mut rest = Vec::new();
        for _ in 0..2 {
            let mut line = String::new();
            tokio::time::timeout(Duration::from_millis(100), reader.read_line(&mut line))
                .await
                .expect("batch was split across ticks")
                .unwrap();
            rest.push(line);
        }
        assert_eq!(first, "event 1\n");
        assert_eq!(rest, vec!["event 2\n", "event 3\n"]);
    }

    #[tokio::test]
    async fn test_client_close_unregisters_and_purges_unsent_commands() {
        // Arrange: the command is queued but no engine ever takes it
        let mut h = start_session();
        wait_for(|| h.registry.client_count() == 1).await;
        h.client.write_all(b"slow\n").await.unwrap();
        wait_for(|| h.registry.outgoing_len() == 1).await;

        // Act
        drop(h.client);
        let end = h.session.await.unwrap().unwrap();

        // Assert
        assert_eq!(end, SessionEnd::ClientClosed);
        assert_eq!(h.registry.client_count(), 0);
        assert_eq!(h.registry.outgoing_len(), 0);
    }

    #[tokio::test]
    async fn test_cleared_running_flag_ends_session() {
        let h = start_session();
        wait_for(|| h.registry.client_count() == 1).await;

        h.running.store(false, Ordering::Relaxed);
        let end = h.session.await.unwrap().unwrap();

        assert_eq!(end, SessionEnd::Shutdown);
        assert_eq!(h.registry.client_count(), 0);
    }
}
