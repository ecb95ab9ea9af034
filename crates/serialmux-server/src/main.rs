//! serialmuxd: share one serial device among many TCP clients.
//!
//! # Usage
//!
//! ```text
//! serialmuxd serve [OPTIONS]
//!   --config          <PATH>   TOML config file
//!   --listen          <ADDR>   client listener [default: 127.0.0.1:9994]
//!   --device          <PATH>   serial port, or tcp://host:port [default: /dev/ttyUSB0]
//!   --baud            <RATE>   serial baud rate [default: 9600]
//!   --poll-interval-ms <MS>    session mailbox poll [default: 10]
//!   --read-timeout-ms <MS>     one device read [default: 50]
//!   --max-attempts    <N>      reads per reply before !timeout [default: 100]
//!   --max-line-length <BYTES>  longest accepted line [default: 1024]
//!   --log-level       <LEVEL>  used when RUST_LOG is unset [default: info]
//!
//! serialmuxd query [--server <ADDR>] [--timeout-secs <S>] <COMMAND>...
//! ```
//!
//! # Precedence
//!
//! Built-in defaults, then the `--config` file, then flags / environment
//! variables.  `RUST_LOG` overrides `--log-level` entirely.
//!
//! | Variable                  | Flag                  |
//! |---------------------------|-----------------------|
//! | `SERIALMUX_CONFIG`        | `--config`            |
//! | `SERIALMUX_LISTEN`        | `--listen`            |
//! | `SERIALMUX_DEVICE`        | `--device`            |
//! | `SERIALMUX_BAUD`          | `--baud`              |
//! | `SERIALMUX_POLL_MS`       | `--poll-interval-ms`  |
//! | `SERIALMUX_READ_TIMEOUT_MS` | `--read-timeout-ms` |
//! | `SERIALMUX_MAX_ATTEMPTS`  | `--max-attempts`      |
//! | `SERIALMUX_MAX_LINE`      | `--max-line-length`   |
//! | `SERIALMUX_LOG_LEVEL`     | `--log-level`         |
//! | `SERIALMUX_SERVER`        | `query --server`      |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use serialmux_server::domain::ServerConfig;
use serialmux_server::infrastructure::config_file::{self, FileConfig};
use serialmux_server::infrastructure::{query, Daemon, QueryOutcome};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "serialmuxd",
    about = "Multiplexes one half-duplex serial device among many TCP clients",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the multiplexer daemon.
    Serve(ServeArgs),
    /// Send one command to a running daemon and print the reply.
    Query(QueryArgs),
}

/// Overrides for the daemon configuration.  Unset flags keep the value from
/// the config file, or the built-in default.
#[derive(Debug, Default, Args)]
struct ServeArgs {
    /// TOML config file.
    #[arg(long, env = "SERIALMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Address the client listener binds to.
    ///
    /// The protocol has no authentication; bind a non-loopback address only
    /// on a trusted network.
    #[arg(long, env = "SERIALMUX_LISTEN")]
    listen: Option<String>,

    /// Serial port path, or `tcp://host:port` for a network serial bridge.
    #[arg(long, env = "SERIALMUX_DEVICE")]
    device: Option<String>,

    #[arg(long, env = "SERIALMUX_BAUD")]
    baud: Option<u32>,

    #[arg(long, env = "SERIALMUX_POLL_MS")]
    poll_interval_ms: Option<u64>,

    /// How long one device read waits for a line.
    #[arg(long, env = "SERIALMUX_READ_TIMEOUT_MS")]
    read_timeout_ms: Option<u64>,

    /// Device reads spent waiting for one reply before `!timeout`.
    #[arg(long, env = "SERIALMUX_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    #[arg(long, env = "SERIALMUX_MAX_LINE")]
    max_line_length: Option<usize>,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, env = "SERIALMUX_LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Debug, Args)]
struct QueryArgs {
    /// Address of the running daemon.
    #[arg(long, default_value = "127.0.0.1:9994", env = "SERIALMUX_SERVER")]
    server: SocketAddr,

    /// Seconds to wait for the reply.
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,

    /// Command words, sent as one line.
    #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
    command: Vec<String>,
}

impl ServeArgs {
    /// Layers the flags over the config file (or defaults).
    ///
    /// Returns the validated [`ServerConfig`] and the log level.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or the merged
    /// values are invalid.
    fn into_settings(self) -> anyhow::Result<(ServerConfig, String)> {
        let mut file = match &self.config {
            Some(path) => config_file::load(path)
                .with_context(|| format!("loading config file {}", path.display()))?,
            None => FileConfig::default(),
        };

        if let Some(listen) = self.listen {
            file.server.listen_addr = listen;
        }
        if let Some(device) = self.device {
            file.device.endpoint = device;
        }
        if let Some(baud) = self.baud {
            file.device.baud_rate = baud;
        }
        if let Some(ms) = self.poll_interval_ms {
            file.server.poll_interval_ms = ms;
        }
        if let Some(ms) = self.read_timeout_ms {
            file.device.read_timeout_ms = ms;
        }
        if let Some(n) = self.max_attempts {
            file.device.max_attempts = n;
        }
        if let Some(n) = self.max_line_length {
            file.server.max_line_length = n;
        }
        if let Some(level) = self.log_level {
            file.log.level = level;
        }

        let config = file
            .to_server_config()
            .context("invalid configuration")?;
        Ok((config, file.log.level))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Query(args) => run_query(args).await,
    }
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let (config, log_level) = args.into_settings()?;
    init_tracing(&log_level);

    info!(
        "serialmuxd starting: listen={} device={} read_timeout={:?} max_attempts={} (reply deadline {:?})",
        config.listen_addr,
        config.device,
        config.read_timeout,
        config.max_attempts,
        config.reply_deadline()
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    Daemon::new(config).run(running).await?;

    info!("serialmuxd stopped");
    Ok(())
}

async fn run_query(args: QueryArgs) -> anyhow::Result<()> {
    init_tracing("warn");

    let command = args.command.join(" ");
    let outcome = query(args.server, &command, Duration::from_secs(args.timeout_secs))
        .await
        .with_context(|| format!("query {command:?} to {}", args.server))?;

    match outcome {
        QueryOutcome::Reply(line) => println!("{line}"),
        QueryOutcome::NoReply => {}
        QueryOutcome::DeviceTimeout => {
            anyhow::bail!("device did not answer {command:?}")
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
