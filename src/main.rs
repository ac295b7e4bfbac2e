//! co menu-bar supervisor
//!
//! Runs the `co` agent CLI under supervision: first-run `co init`/`co auth`,
//! a login-shell environment so API keys resolve, and streamed PTY I/O.
//! This binary drives it from a terminal; a menu-bar UI talks to the same
//! [`agent::Supervisor`].

mod agent;
mod config;
mod env;
mod frontend;
mod pty;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use agent::{Supervisor, SupervisorOptions};
use config::LauncherConfig;
use env::EnvironmentResolver;
use frontend::{Console, OutputMode};
use pty::{PtyLauncher, TerminalSize};

/// co menu-bar supervisor
///
/// Runs `co ai`, setting it up first if needed
#[derive(Parser, Debug)]
#[command(name = "co-menubar")]
#[command(version, about, long_about = None)]
struct Args {
    /// Launcher configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bundled co binary, preferred over PATH when executable
    #[arg(long)]
    bundled_binary: Option<PathBuf>,

    /// Home directory to check for ~/.co
    #[arg(long)]
    home: Option<PathBuf>,

    /// Terminal columns for the agent
    #[arg(long, default_value_t = 80)]
    cols: u16,

    /// Terminal rows for the agent
    #[arg(long, default_value_t = 24)]
    rows: u16,

    /// Write events as JSON lines
    #[arg(long)]
    json: bool,

    /// Start the agent immediately
    #[arg(long)]
    auto_start: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // stdout belongs to the agent
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    info!("co menu-bar v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => LauncherConfig::load(path)?,
        None => LauncherConfig::default(),
    };
    if args.bundled_binary.is_some() {
        config.bundled_binary = args.bundled_binary;
    }
    if args.home.is_some() {
        config.home = args.home;
    }

    let home = config.co_home()?;
    info!("Using co home {}", home.root().display());

    let resolver = Arc::new(EnvironmentResolver::new(config.fallback_shell.clone()));
    let supervisor = Supervisor::spawn(
        PtyLauncher::new(TerminalSize::new(args.cols, args.rows)),
        resolver,
        SupervisorOptions {
            home,
            program: config.program,
            bundled_binary: config.bundled_binary,
        },
    );

    let mode = if args.json {
        OutputMode::Json
    } else {
        OutputMode::Plain
    };

    Console::new(supervisor, mode)
        .with_auto_start(args.auto_start)
        .run(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            shutdown_signal(),
        )
        .await?;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
