//! CorrelationEngine: serialises client commands onto the device and routes
//! replies back.
//!
//! The device is half-duplex: it answers one command at a time, and its
//! replies carry no request id.  The engine therefore owns the channel
//! exclusively and runs one conversation at a time:
//!
//! ```text
//! step():
//!   1. read one line            ── significant? ──► broadcast
//!   2. while outgoing non-empty:
//!        pop (origin, command) ──► write command
//!        comment? ──► next
//!        up to max_attempts reads:
//!          blank / comment          ──► discard
//!          first word == command's  ──► deliver to origin, next
//!          anything else            ──► broadcast
//!        exhausted ──► deliver "!timeout" to origin
//! ```
//!
//! Every read that is not the match consumes one attempt, including blank
//! reads and unrelated chatter.  A chatty device therefore makes timeouts
//! more likely; the budget is `read_timeout × max_attempts` only when the
//! device is silent.
//!
//! Correlation is by first word only.  Two in-flight commands can never share
//! a first word (there is only ever one in flight), but a stale reply from a
//! previous, timed-out command with the same first word is indistinguishable
//! from a fresh one.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use serialmux_core::{
    answers, command_token, is_comment, is_significant, ClientId, MailboxError, MailboxRegistry,
    Message, TIMEOUT_SENTINEL,
};
use thiserror::Error;
use tracing::{debug, info, warn};

// ── Channel port ──────────────────────────────────────────────────────────────

/// Errors from the device channel.  All of them are fatal to the engine.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The device could not be opened.
    #[error("failed to open device {endpoint}: {source}")]
    Open {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing the device failed.
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device stream reached end-of-file.
    #[error("device channel closed")]
    Closed,
}

/// Line-oriented access to the device.
///
/// Infrastructure implementations wrap a serial port or TCP bridge; tests use
/// scripted doubles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SerialChannel: Send {
    /// Reads one line without its terminator.
    ///
    /// Returns `Ok(None)` when no complete line arrived within the channel's
    /// read timeout.
    async fn read_line(&mut self) -> Result<Option<String>, ChannelError>;

    /// Writes `line` followed by a line terminator.
    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError>;
}

#[async_trait]
impl<C: SerialChannel + ?Sized> SerialChannel for Box<C> {
    async fn read_line(&mut self) -> Result<Option<String>, ChannelError> {
        (**self).read_line().await
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        (**self).write_line(line).await
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Fatal engine failures.  The process cannot make progress without the
/// device, so these end the daemon.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("device read failed: {0}")]
    Read(#[source] ChannelError),

    #[error("failed to write {line:?} to device: {source}")]
    Write {
        line: String,
        #[source]
        source: ChannelError,
    },
}

/// What one [`CorrelationEngine::step`] did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    /// Device lines fanned out to every client.
    pub broadcasts: usize,
    /// Outgoing messages written to the device.
    pub dispatched: usize,
    /// Commands whose reply was found.
    pub matched: usize,
    /// Commands answered with the timeout sentinel.
    pub timed_out: usize,
}

/// A command written to the device and still waiting for its reply.
#[derive(Debug)]
struct PendingCommand {
    origin: ClientId,
    command_token: String,
    attempts_remaining: u32,
}

/// Owns the device channel and moves messages between it and the registry.
pub struct CorrelationEngine<C> {
    channel: C,
    registry: Arc<MailboxRegistry>,
    max_attempts: u32,
}

impl<C: SerialChannel> CorrelationEngine<C> {
    pub fn new(channel: C, registry: Arc<MailboxRegistry>, max_attempts: u32) -> Self {
        Self {
            channel,
            registry,
            max_attempts,
        }
    }

    /// Runs [`step`](Self::step) until `running` is cleared or the channel
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns the first [`EngineError`]; the channel is not retried.
    pub async fn run(mut self, running: Arc<AtomicBool>) -> Result<(), EngineError> {
        info!("correlation engine started (max_attempts={})", self.max_attempts);
        while running.load(Ordering::Relaxed) {
            let report = self.step().await?;
            if report != StepReport::default() {
                debug!(?report, "engine step");
            }
            // Channels that never block (e.g. a closed-but-buffered stream)
            // must not starve the session tasks.
            tokio::task::yield_now().await;
        }
        info!("correlation engine stopped");
        Ok(())
    }

    /// One engine iteration: an unsolicited read, then every queued command.
    ///
    /// # Errors
    ///
    /// [`EngineError`] on any channel failure.
    pub async fn step(&mut self) -> Result<StepReport, EngineError> {
        let mut report = StepReport::default();

        if let Some(line) = self.read().await? {
            if is_significant(&line) {
                self.broadcast(line);
                report.broadcasts += 1;
            }
        }

        while let Some(message) = self.registry.pop_outgoing() {
            report.dispatched += 1;
            self.dispatch(message, &mut report).await?;
        }

        Ok(report)
    }

    async fn dispatch(&mut self, message: Message, report: &mut StepReport) -> Result<(), EngineError> {
        let Some(origin) = message.origin().client() else {
            warn!("dropping outgoing broadcast message {:?}", message.payload());
            return Ok(());
        };
        let payload = message.payload();

        debug!("client {origin} → device: {payload:?}");
        self.channel
            .write_line(payload)
            .await
            .map_err(|source| EngineError::Write {
                line: payload.to_string(),
                source,
            })?;

        if is_comment(payload) {
            return Ok(());
        }
        let Some(token) = command_token(payload) else {
            return Ok(());
        };

        let mut pending = PendingCommand {
            origin,
            command_token: token.to_string(),
            attempts_remaining: self.max_attempts,
        };

        while pending.attempts_remaining > 0 {
            let line = self.read().await?;
            pending.attempts_remaining -= 1;

            let Some(line) = line.filter(|l| is_significant(l)) else {
                continue;
            };

            if answers(&line, &pending.command_token) {
                debug!("device → client {}: {line:?}", pending.origin);
                self.deliver(pending.origin, line);
                report.matched += 1;
                return Ok(());
            }

            debug!(
                "unrelated line while waiting for {:?}; broadcasting {line:?}",
                pending.command_token
            );
            self.broadcast(line);
            report.broadcasts += 1;
        }

        info!(
            "no reply to {:?} from client {} after {} attempt(s)",
            pending.command_token, pending.origin, self.max_attempts
        );
        self.deliver(pending.origin, TIMEOUT_SENTINEL.to_string());
        report.timed_out += 1;
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<String>, EngineError> {
        self.channel.read_line().await.map_err(EngineError::Read)
    }

    fn broadcast(&self, line: String) {
        let recipients = self.registry.deliver_broadcast(Message::broadcast(line));
        debug!("broadcast to {recipients} client(s)");
    }

    fn deliver(&self, id: ClientId, line: String) {
        match self.registry.deliver(id, Message::from_client(id, line)) {
            Ok(()) => {}
            Err(MailboxError::UnknownClient(_)) => {
                debug!("client {id} disconnected before its reply arrived; dropping");
            }
            Err(e) => warn!("delivery to client {id} failed: {e}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
