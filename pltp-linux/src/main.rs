// PLTP host daemon: runs a Base or Sensor session loop over TCP.

mod config;
mod disk;
mod inbox;
mod run;
mod transport;
mod watchdog;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use pltp_core::Role;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pltp-linux", version, about = "PLTP Base/Sensor daemon")]
struct Cli {
    /// Config file (default: ~/.config/pltp/config.toml, then /etc/pltp/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG wins when set)
    #[arg(short, long)]
    verbose: bool,

    /// Which end of the link this host is
    #[arg(value_enum)]
    role: RoleArg,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RoleArg {
    Base,
    Sensor,
}

impl From<RoleArg> for Role {
    fn from(r: RoleArg) -> Self {
        match r {
            RoleArg::Base => Role::Base,
            RoleArg::Sensor => Role::Sensor,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = config::load(cli.config.as_deref())?;
    let role = Role::from(cli.role);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), %role, "pltp-linux starting");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(serve(role, cfg))
}

/// Session loop on a blocking thread, watchdog supervisor alongside, until a
/// signal or a fatal error.
async fn serve(role: Role, cfg: config::Config) -> anyhow::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let beat = Arc::new(watchdog::Heartbeat::new());

    let supervisor = tokio::spawn(watchdog::supervise(beat.clone(), cfg.watchdog_stall()));
    let mut worker = tokio::task::spawn_blocking({
        let stop = stop.clone();
        move || run::run(role, &cfg, &stop, beat)
    });

    let joined = tokio::select! {
        r = &mut worker => r,
        s = shutdown_signal() => {
            s?;
            tracing::info!("shutdown requested; finishing current exchange");
            stop.store(true, Ordering::Relaxed);
            worker.await
        }
    };
    supervisor.abort();
    joined.context("session thread panicked")?
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
