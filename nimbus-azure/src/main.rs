//! nimbus-azure: reconciles Subnet and Redis records against Azure.
//!
//! Seeds the record stores from a manifest, then runs every controller
//! against the simulated Azure backend until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nimbus_azure::clients::sim::SimulatedAzure;
use nimbus_azure::config::Config;
use nimbus_azure::controller::{self, Clients, Stores};
use nimbus_azure::manifest::Manifest;
use nimbus_runtime::Manager;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nimbus_azure=info,nimbus_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    let settings = config.settings();
    info!(
        workers = settings.options.workers,
        sync_period = ?settings.options.resync_period,
        "Starting nimbus-azure"
    );

    let stores = Stores::new();
    if let Some(path) = &config.manifests {
        Manifest::from_path(path)?
            .apply(&stores)
            .await
            .context("cannot seed stores")?;
    }

    let cloud = SimulatedAzure::new();
    let mut manager = Manager::new();
    controller::setup(&mut manager, &stores, &settings, &Clients::simulated(&cloud));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(manager.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for ctrl-c")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    running.await.context("manager task failed")?;

    let calls = cloud.calls();
    info!(
        reads = calls.reads,
        writes = calls.writes,
        deletes = calls.deletes,
        "Stopped"
    );
    Ok(())
}
