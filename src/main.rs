mod cache;
mod config;
mod obs;
mod overlay;
mod player;
mod reconcile;
mod track;

use crate::{
    cache::LastSeenCache,
    config::Config,
    obs::ObsController,
    overlay::Overlay,
    player::PlayerCli,
    reconcile::{Mode, Reconciler},
};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Refreshes an OBS now-playing overlay whenever the Spotify track changes.
#[derive(Parser, Debug)]
#[command(name = "nowplaying-obs", version, about)]
struct Args {
    /// Run a single check and exit
    #[arg(long, conflicts_with = "force")]
    once: bool,

    /// Reload the overlay unconditionally and exit
    #[arg(long)]
    force: bool,

    /// Path to a TOML config file (defaults to ./config.toml and friends)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

impl Args {
    fn mode(&self) -> Mode {
        if self.once {
            Mode::Once
        } else if self.force {
            Mode::Force
        } else {
            Mode::Continuous
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    debug!(sources = ?config.sources, cache = %config.cache_file.display(), "Configuration loaded");

    let controller = ObsController::new(
        config.obs.clone(),
        config.call_timeout,
        config.folder_refresh,
    );
    let reconciler = Reconciler::new(
        PlayerCli::new(config.player_command.clone(), config.call_timeout),
        LastSeenCache::new(config.cache_file.clone()),
        Overlay::new(controller, config.sources.clone(), config.reload_delay),
        config.check_interval,
    );

    reconciler.run(args.mode(), shutdown_signal()).await;
    Ok(())
}
