//! One-shot query client.
//!
//! Connects to a running daemon, sends a single command and waits for the
//! line that answers it.  Broadcasts that arrive first are skipped.  This is
//! the scripted counterpart to a long-lived client session and backs the
//! `serialmuxd query` subcommand.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serialmux_core::{answers, command_token, is_comment, TIMEOUT_SENTINEL};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::domain::config::DEFAULT_MAX_LINE_LENGTH;
use crate::infrastructure::codec::LineCodec;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command is empty")]
    EmptyCommand,

    /// The daemon sent nothing that answers the command in time.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("server closed the connection before replying")]
    Closed,
}

/// Result of a successful query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// The device's reply line.
    Reply(String),
    /// The daemon gave up waiting for the device.
    DeviceTimeout,
    /// Comment commands are forwarded but never answered.
    NoReply,
}

/// Sends `command` to the daemon at `addr` and waits up to `wait` for its
/// answer.
///
/// # Errors
///
/// [`QueryError`] if the command is blank, the daemon is unreachable, the
/// connection drops, or nothing answers within `wait`.
pub async fn query(
    addr: SocketAddr,
    command: &str,
    wait: Duration,
) -> Result<QueryOutcome, QueryError> {
    let command = command.trim();
    let token = command_token(command).ok_or(QueryError::EmptyCommand)?;

    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| QueryError::Connect { addr, source })?;
    let mut framed = Framed::new(stream, LineCodec::new(DEFAULT_MAX_LINE_LENGTH));

    framed.send(command).await?;
    if is_comment(command) {
        return Ok(QueryOutcome::NoReply);
    }

    timeout(wait, read_answer(&mut framed, token))
        .await
        .map_err(|_| QueryError::Timeout(wait))?
}

async fn read_answer(
    framed: &mut Framed<TcpStream, LineCodec>,
    token: &str,
) -> Result<QueryOutcome, QueryError> {
    while let Some(line) = framed.next().await {
        let line = line?;
        if line == TIMEOUT_SENTINEL {
            return Ok(QueryOutcome::DeviceTimeout);
        }
        if answers(&line, token) {
            return Ok(QueryOutcome::Reply(line));
        }
        debug!("skipping broadcast {line:?}");
    }
    Err(QueryError::Closed)
}
