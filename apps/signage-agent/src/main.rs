//! Signage Agent - standalone headless signage player runtime.
//!
//! This binary drives a single display through pairing and into
//! steady-state playback: it loads configuration, bootstraps every
//! `signage-core` service, starts the device's state machine, and waits
//! for a shutdown signal.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use signage_core::{bootstrap_services, Collaborators, DeviceDescriptor, InstanceLock};
use tokio::signal;

/// Signage Agent - headless device-resident signage player runtime.
#[derive(Parser, Debug)]
#[command(name = "signage-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (JSON).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "SIGNAGE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Backend base URL (overrides config file).
    #[arg(long, env = "SIGNAGE_API_BASE")]
    api_base: Option<String>,

    /// Data directory for persistent state (certs, cache, queues).
    #[arg(short = 'd', long, env = "SIGNAGE_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Human-readable label presented during pairing.
    #[arg(long, env = "SIGNAGE_DEVICE_LABEL", default_value = "signage-agent")]
    device_label: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("signage-agent v{}", env!("CARGO_PKG_VERSION"));

    let mut app_config = config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(api_base) = args.api_base {
        app_config.api_base = api_base;
    }

    app_config
        .validate()
        .context("invalid configuration, refusing to start")?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.data_dir.join("config.json"));

    let lock_path = args.data_dir.join("agent.lock");
    let _instance_lock = InstanceLock::acquire(&lock_path)
        .context("another signage-agent instance is already running against this data directory")?;

    let services = bootstrap_services(&app_config, args.data_dir.clone(), Collaborators::default())
        .context("failed to bootstrap services")?;

    log::info!("services bootstrapped successfully");

    let descriptor = DeviceDescriptor {
        device_label: args.device_label,
        width: None,
        height: None,
        orientation: None,
        aspect_ratio: None,
        model: hostname::get().ok().and_then(|h| h.into_string().ok()),
        codecs: Vec::new(),
    };

    let player_flow = services.player_flow.clone();
    player_flow
        .start(&descriptor)
        .await
        .context("player flow failed to reach steady state")?;

    if app_config.device_id.is_none() {
        app_config.device_id = services.pairing.device_id();
    }
    if let Err(e) = app_config.save(&config_path) {
        log::warn!("failed to persist configuration after pairing: {e}");
    }

    log::info!("entering steady-state playback");

    shutdown_signal().await;

    log::info!("shutdown signal received, cleaning up...");
    services.shutdown().await;

    log::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
