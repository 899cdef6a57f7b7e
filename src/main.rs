//! # huddle
//!
//! Relay binary: loads settings, installs logging and metrics, serves rooms
//! until SIGINT or SIGTERM.

#![deny(unsafe_code)]

mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use huddle_server::{HuddleServer, ServerConfig};
use huddle_settings::HuddleSettings;
use tracing::{info, warn};

/// Room-based WebSocket presence relay.
#[derive(Parser, Debug)]
#[command(name = "huddle", about = "Room-based WebSocket presence relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings and `PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.huddle/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn load_settings(&self) -> Result<HuddleSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(huddle_settings::settings_path);
        let mut settings =
            huddle_settings::load_settings_from_path(&path).context("failed to load settings")?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    logging::init(&settings.logging)?;

    let config = ServerConfig::from(&settings);
    let mut server = HuddleServer::new(config.clone());
    match huddle_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics disabled"),
    }

    let handle = server
        .bind()
        .await
        .with_context(|| format!("failed to start relay on {}", config.bind_addr()))?;
    info!(addr = %handle.local_addr(), "huddle ready");

    let signal = wait_for_signal().await?;
    info!(signal, "shutting down");

    let closed = handle.shutdown();
    info!(closed, "closed live connections");
    if !handle.shutdown_and_wait().await {
        warn!("shutdown did not finish in time");
    }
    info!("bye");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM, returning the signal's name.
#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl+c")?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    Ok("SIGINT")
}
