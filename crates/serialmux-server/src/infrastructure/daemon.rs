//! Daemon: wires the device channel, the engine and the listener together.
//!
//! ```text
//! Daemon::run
//!   ├── open_device           (failure: fatal, nothing started)
//!   ├── bind_listener         (failure: fatal)
//!   └── run_with
//!         ├── spawn CorrelationEngine::run
//!         └── select!
//!               listener stopped  ──► clear running, join engine
//!               engine stopped    ──► clear running, join listener
//! ```
//!
//! Clearing the shared `running` flag is the only shutdown signal.  The
//! listener, every session and the engine poll it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use serialmux_core::MailboxRegistry;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tracing::{error, info};

use crate::application::{CorrelationEngine, EngineError, SerialChannel};
use crate::domain::ServerConfig;
use crate::infrastructure::device::open_device;
use crate::infrastructure::tcp_server::{bind_listener, serve};

/// The whole multiplexer: one registry shared by one engine and every session.
pub struct Daemon {
    config: Arc<ServerConfig>,
    registry: Arc<MailboxRegistry>,
}

impl Daemon {
    /// Builds the daemon.  Nothing is opened until [`run`](Self::run).
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(MailboxRegistry::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared registry, for observing client state from outside.
    pub fn registry(&self) -> Arc<MailboxRegistry> {
        Arc::clone(&self.registry)
    }

    /// Opens the configured device, binds the listener and serves until
    /// `running` is cleared or the device fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be opened, the listener cannot
    /// be bound, or the device channel fails while running.
    pub async fn run(&self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        let channel = open_device(
            &self.config.device,
            self.config.read_timeout,
            self.config.max_line_length,
        )
        .await
        .context("cannot start without the device")?;
        let listener = bind_listener(self.config.listen_addr).await?;
        self.run_with(channel, listener, running).await
    }

    /// Runs the engine over `channel` and serves clients on `listener`.
    ///
    /// # Errors
    ///
    /// Returns the engine's [`EngineError`] (with context) if the channel
    /// fails.
    pub async fn run_with<C>(
        &self,
        channel: C,
        listener: TcpListener,
        running: Arc<AtomicBool>,
    ) -> anyhow::Result<()>
    where
        C: SerialChannel + 'static,
    {
        info!(
            "serialmux running: device={} clients={} max_attempts={}",
            self.config.device,
            listener.local_addr()?,
            self.config.max_attempts
        );

        let engine = CorrelationEngine::new(
            channel,
            Arc::clone(&self.registry),
            self.config.max_attempts,
        );
        let mut engine_task = tokio::spawn(engine.run(Arc::clone(&running)));

        let server = serve(
            listener,
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            Arc::clone(&running),
        );
        tokio::pin!(server);

        tokio::select! {
            served = &mut server => {
                running.store(false, Ordering::Relaxed);
                let engine_result = engine_outcome(engine_task.await);
                served.and(engine_result)
            }
            joined = &mut engine_task => {
                running.store(false, Ordering::Relaxed);
                // The accept loop notices the cleared flag within one poll.
                let served = server.await;
                engine_outcome(joined).and(served)
            }
        }
    }
}

fn engine_outcome(joined: Result<Result<(), EngineError>, JoinError>) -> anyhow::Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("correlation engine failed: {e}");
            Err(anyhow::Error::new(e).context("device channel failed"))
        }
        Err(e) => Err(anyhow::anyhow!("correlation engine task aborted: {e}")),
    }
}
