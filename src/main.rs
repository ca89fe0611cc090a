//! # Sapphire-KV
//!
//! A distributed, eventually-consistent key-value object fabric. Each
//! process holds the objects it originates plus TTL-bounded replicas of
//! objects from other processes, reconciled via broker pub/sub rather than
//! any consensus protocol.
//!
//! ## Architecture Overview
//!
//! - **Registry**: the process's object table, origin- and replica-owned
//! - **Publisher/Subscriber**: outbound/inbound frames over the broker
//! - **Re-announcer**: periodic heartbeat refreshing peers' replica TTLs
//! - **TTL reaper**: expires stale replicas locally
//! - **Event pipeline**: fan-in dispatcher plus a fixed worker pool
//!   applying inbound attribute changes
//! - **Admin HTTP surface**: a thin, unauthenticated view over the registry
//!
//! ## Command Line Arguments
//! * `--config <path>` — path to configuration file (default: config.toml)
//! * `--origin-id <id>` — fixed origin identity (default: a generated UUID)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};

use sapphire_kv::config::Settings;
use sapphire_kv::{Fabric, Origin};

#[derive(Parser, Debug)]
#[command(name = "sapphire-kv", about = "A distributed, eventually-consistent key-value object fabric")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Fixed origin identity for this process. Generated randomly if
    /// omitted.
    #[arg(long)]
    origin_id: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let settings = Settings::load(&args.config).unwrap_or_else(|err| {
        warn!("failed to load {:?} ({err}); using defaults", args.config);
        Settings::default()
    });
    let origin = match args.origin_id {
        Some(id) => Origin::new(id),
        None => Origin::generate(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run(origin, settings))
}

async fn run(origin: Origin, settings: Settings) -> Result<()> {
    let api_port = settings.api_server_port;
    let fabric = Fabric::new(origin, settings);
    fabric.start().await?;

    info!("fabric running: pid={}, origin_id={}", std::process::id(), fabric.origin().as_str());

    let addr = SocketAddr::from(([0, 0, 0, 0], api_port));
    let api_router = sapphire_kv::api::router(Arc::clone(&fabric));
    let server = axum::Server::bind(&addr).serve(api_router.into_make_service());
    let api_task = tokio::spawn(async move {
        if let Err(err) = server.await {
            error!("admin HTTP surface exited: {err}");
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping fabric");

    fabric.stop();
    fabric.join().await;
    api_task.abort();

    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
