use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use density_ingest::config::{AppConfig, Cli};
use density_ingest::db::PgConnector;
use density_ingest::logging::init_logging;
use density_ingest::lookup::BuildingDirectory;
use density_ingest::orchestrator::Orchestrator;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = AppConfig::from_cli(cli)?;
    config.validate_config()?;

    let directory = match &config.buildings {
        Some(path) => BuildingDirectory::load(path)
            .with_context(|| format!("failed to load building table {}", path.display()))?,
        None => BuildingDirectory::bundled().context("bundled building table is invalid")?,
    };

    info!(
        host = %config.database.host,
        port = config.database.port,
        database = %config.database.database,
        watch_dir = %config.watch_dir.display(),
        archive_dir = %config.archive_dir.display(),
        load_all = config.load_all,
        watch = config.watch,
        timezone = %config.timezone.name(),
        buildings = directory.len(),
        "starting density ingest"
    );

    let connector = PgConnector::new(config.connect_options());
    if config.migrate {
        connector
            .run_migrations()
            .await
            .context("database migration failed")?;
    }

    let orchestrator = Orchestrator::new(connector, Arc::new(directory), config.ingest_settings());

    if config.load_all {
        orchestrator
            .backfill(config.backfill_source())
            .await
            .context("backfill failed")?;
    }

    if config.watch {
        let summary = orchestrator
            .watch_directory(&config.watch_dir, shutdown_signal())
            .await
            .context("watch failed")?;
        info!(
            files_loaded = summary.files_loaded,
            files_failed = summary.files_failed,
            records_loaded = summary.records_loaded,
            "watch stopped"
        );
    } else {
        info!("not watching for new files; exiting");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(?err, "failed to listen for CTRL+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => warn!(?err, "failed to listen for TERM signal"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
