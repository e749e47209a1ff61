#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # sshrelay
//!
//! Unattended relay between a remote shell stream and a local TCP server.
//!
//! Bytes arriving from the TCP server are written to the shell; shell output
//! is sent back to the TCP server. The TCP side reconnects on its own, the
//! shell side is reopened on the next write after it was closed for
//! inactivity or repeated write failures.
//!
//! ## Subcommands
//!
//! - `sshrelay run` (default) — run the relay
//! - `sshrelay supervise` — run the relay as a child and restart it on crash
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap subcommands, signal handling
//! supervisor.rs    — built-in supervisor (spawn/restart loop)
//! config.rs        — TOML + env-var + CLI configuration
//! error.rs         — TunnelError
//! address.rs       — host:port parsing
//! timer.rs         — cancellable one-shot deadline
//! shell/
//!   mod.rs         — UpstreamConnector / UpstreamIo, line-oriented I/O
//!   ssh.rs         — SSH shell transport (russh)
//!   tcp.rs         — raw TCP transport (FTP mode)
//! tunnel/
//!   session.rs     — TunnelSession event loop
//!   upstream.rs    — shell stream lifecycle and read poll
//!   downstream.rs  — TCP connection and reconnect
//!   watchdog.rs    — inactivity watchdog
//!   consolidate.rs — FTP-mode output consolidation
//!   stats.rs       — byte counters
//! ```

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sshrelay::config::{Config, Overrides};
use sshrelay::shell::Connector;
use sshrelay::{supervisor, TunnelSession};

/// Relay a remote shell to a local TCP server.
#[derive(Parser)]
#[command(name = "sshrelay", version, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay (default when no subcommand given).
    Run(RunArgs),
    /// Run as supervisor: starts the relay and restarts it on crash.
    Supervise(RunArgs),
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,

    /// Upstream (shell) address, host:port.
    #[arg(short, long)]
    source: Option<String>,

    /// Downstream (TCP server) address, host:port.
    #[arg(short, long)]
    destination: Option<String>,

    /// Inactivity timeout in seconds.
    #[arg(short = 't', long = "ttl")]
    ttl: Option<f64>,

    /// FTP mode: consolidate upstream output before forwarding.
    #[arg(short, long)]
    ftp: bool,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

impl RunArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            source: self.source.clone(),
            destination: self.destination.clone(),
            time_to_live_secs: self.ttl,
            ftp_mode: self.ftp,
            verbose: self.verbose,
        }
    }

    /// Command-line arguments that reproduce these flags for a child process.
    fn to_child_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref p) = self.config {
            args.extend(["--config".to_string(), p.clone()]);
        }
        if let Some(ref s) = self.source {
            args.extend(["--source".to_string(), s.clone()]);
        }
        if let Some(ref d) = self.destination {
            args.extend(["--destination".to_string(), d.clone()]);
        }
        if let Some(ttl) = self.ttl {
            args.extend(["--ttl".to_string(), ttl.to_string()]);
        }
        if self.ftp {
            args.push("--ftp".to_string());
        }
        if self.verbose {
            args.push("--verbose".to_string());
        }
        args
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Supervise(args)) => run_supervisor_mode(&args).await,
        Some(Commands::Run(args)) => run_relay(&args).await,
        None => run_relay(&cli.run).await,
    }
}

/// Load, override and validate the configuration, then start logging.
/// Exits the process on a configuration error.
fn init(args: &RunArgs) -> Config {
    let loaded = Config::load(args.config.as_deref()).and_then(|mut config| {
        config.apply(&args.overrides());
        config.validate()?;
        Ok(config)
    });

    let level = loaded
        .as_ref()
        .map_or_else(|_| "info".to_string(), |c| c.logging.level.clone());
    let log_filter = std::env::var("RUST_LOG").unwrap_or(level);
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

async fn run_supervisor_mode(args: &RunArgs) -> ! {
    let config = init(args);
    info!("sshrelay supervisor starting");
    supervisor::run_supervisor(&args.to_child_args(), &config.supervisor).await
}

async fn run_relay(args: &RunArgs) {
    let config = init(args);

    info!("sshrelay v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Relaying {} (upstream, {:?}) <-> {} (downstream)",
        config.tunnel.source,
        config.upstream.transport_for(config.tunnel.ftp_mode),
        config.tunnel.destination
    );

    let connector = Connector::from_config(&config.upstream, config.tunnel.ftp_mode);
    let session = TunnelSession::new(&config.tunnel, connector);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_token.cancel();
    });

    session.run(shutdown).await;
    info!("Goodbye");
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
