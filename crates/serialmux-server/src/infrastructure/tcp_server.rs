//! TCP listener: accept loop and per-client task spawning.
//!
//! Each accepted connection is handed to its own Tokio task running
//! [`run_session`], so a slow client never delays the next accept.  The loop
//! wakes every 200 ms to check the shared `running` flag, which lets Ctrl+C
//! or an engine failure stop the listener without a dedicated channel.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use serialmux_core::MailboxRegistry;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::domain::ServerConfig;
use crate::infrastructure::session::run_session;

const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Binds the client listener.
///
/// # Errors
///
/// Returns an error if the address is in use or cannot be bound.
pub async fn bind_listener(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind client listener on {addr}"))?;
    info!("listening for clients on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accepts clients on `listener` until `running` is cleared.
///
/// # Errors
///
/// Currently infallible once the listener is bound; accept errors are logged
/// and the loop continues.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<MailboxRegistry>,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                info!("new client connection from {peer}");
                spawn_session(
                    stream,
                    peer,
                    Arc::clone(&registry),
                    Arc::clone(&config),
                    Arc::clone(&running),
                );
            }
            Ok(Err(e)) => {
                // Transient (e.g. EMFILE); keep serving the clients we have.
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    Ok(())
}

/// Binds `config.listen_addr` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(
    registry: Arc<MailboxRegistry>,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = bind_listener(config.listen_addr).await?;
    serve(listener, registry, config, running).await
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<MailboxRegistry>,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("session {peer}: could not disable Nagle: {e}");
    }
    tokio::spawn(async move {
        // Outcome is logged inside run_session.
        let _ = run_session(stream, peer, registry, config, running).await;
    });
}
