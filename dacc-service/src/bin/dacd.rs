// SPDX-License-Identifier: GPL-3.0-only

//! Data accelerator host daemon
//!
//! Registers this host's bricks, keeps the host marked alive, drives the
//! volumes whose primary brick lives here and answers session actions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use dacc_registry::build_registries;
use dacc_service::devices::DeviceEnumerator;
use dacc_service::store::connect_keystore;
use dacc_service::{ActionHandler, FakeProvider, HostWatcher, ServiceConfig, logging};

#[derive(Parser)]
#[command(name = "dacd")]
#[command(about = "Data accelerator host daemon", long_about = None)]
struct Cli {
    /// TOML configuration file (also read from DACC_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(logging::DEFAULT_FILTER);
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("dacd failed: {e:#}");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = ServiceConfig::load(cli.config.as_deref())?;
    let hostname = config.hostname()?;
    tracing::info!(host = %hostname, "starting dacd v{}", env!("CARGO_PKG_VERSION"));

    let keystore = connect_keystore(&config.store).await?;
    let registries = build_registries(keystore, config.registry_options());
    let bricks = DeviceEnumerator::new(config.devices.clone()).bricks(&hostname);

    let cancel = CancellationToken::new();
    let watcher = HostWatcher::new(
        hostname.clone(),
        bricks,
        registries.pools.clone(),
        registries.volumes.clone(),
        Arc::new(FakeProvider::new()),
    );
    watcher.start(&cancel).await?;

    let handler = ActionHandler::new(
        &hostname,
        registries.actions.clone(),
        registries.sessions.clone(),
        registries.volumes.clone(),
        registries.pools.clone(),
        config.timeouts().state,
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("shutdown requested"),
            Err(e) => tracing::error!("unable to listen for ctrl-c: {e}"),
        }
        shutdown.cancel();
    });

    // either loop stopping takes the other down with it
    let (watched, handled) = tokio::join!(
        async {
            let result = watcher.run(cancel.clone()).await;
            cancel.cancel();
            result
        },
        async {
            let result = handler.run(cancel.clone()).await;
            cancel.cancel();
            result
        }
    );
    watched?;
    handled?;

    tracing::info!(host = %hostname, "dacd stopped");
    Ok(())
}
