// SPDX-License-Identifier: GPL-3.0-only
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fleetd::api::{ApiHandlers, HttpServer};
use fleetd::auto_update::{AutoUpdater, SystemClock, UpdateStateStore};
use fleetd::config::Config;
use fleetd::events::EventBus;
use fleetd::installer::{CommandInstaller, Installer};
use fleetd::logging::setup_logging;
use fleetd::notify::LogNotifier;
use fleetd::release::{HttpReleaseSource, ReleaseSource};
use fleetd::store::{KvStore, SqliteKvStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    setup_logging(&config.log_level, config.log_format)?;

    info!("Starting fleetd v{}", env!("CARGO_PKG_VERSION"));

    if let Some(parent) = config.state_db_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let kv: Arc<dyn KvStore> = Arc::new(SqliteKvStore::new(&config.state_db_path).await?);
    info!("State store initialized at {}", config.state_db_path.display());

    let (state, persister) = UpdateStateStore::open(kv, config.update_delay()).await?;
    let state = Arc::new(state);

    let cancel = CancellationToken::new();

    let installer: Arc<dyn Installer> = Arc::new(CommandInstaller::new(&config.installer_command)?);
    let releases: Arc<dyn ReleaseSource> = Arc::new(
        HttpReleaseSource::new(&config.release_api_url, config.release_api_key.clone())?
            .with_cancellation(cancel.clone()),
    );
    let events = EventBus::default();

    let updater = AutoUpdater::new(
        Arc::clone(&state),
        Arc::clone(&installer),
        releases,
        events.clone(),
        Arc::new(LogNotifier),
        Arc::new(SystemClock),
    );

    let auto_updates = Arc::new(updater.start(config.update_intervals(), cancel.clone()));

    let handlers = ApiHandlers::new(updater, Arc::clone(&auto_updates), installer, events);
    let http_server = HttpServer::new(handlers, config.local_api_bind);
    let http_cancel = cancel.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.serve(http_cancel).await {
            error!(error = %e, "HTTP server error");
        }
    });

    info!("All services started. Waiting for shutdown signal...");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal (Ctrl+C)");
        }
        Err(err) => {
            error!(error = %err, "Unable to listen for shutdown signal");
        }
    }

    info!("Shutting down...");
    cancel.cancel();

    // In-flight API requests may still trigger passes until the server is down
    if let Err(e) = http_task.await {
        error!(error = %e, "HTTP server task failed");
    }
    auto_updates.shutdown().await;
    state.close(persister).await;

    info!("Shutdown complete");
    Ok(())
}
