use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use fleetwatch::{
    actors::{
        maintenance::MaintenanceHandle, notifier::AlertNotifier, notifier::NotifierHandle,
        poller::PollerHandle,
    },
    alerts::AlertDispatcher,
    config::{Config, StorageConfig, read_config_file},
    roster::{AgentConfigPusher, RosterService},
    storage::{Repositories, memory::MemoryBackend},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Agents get their watch lists once the control plane has settled
const CONFIG_PUSH_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init(log_level: &str) {
    let level = log_level.parse().unwrap_or(LevelFilter::DEBUG);
    let filter = filter::Targets::new()
        .with_targets(vec![("fleetwatch", level), ("fleetwatch_center", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

async fn open_storage(config: &StorageConfig) -> anyhow::Result<Repositories> {
    match config {
        StorageConfig::None => {
            warn!("using in-memory storage, nothing survives a restart");
            Ok(Repositories::from_backend(Arc::new(MemoryBackend::new())))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let backend = fleetwatch::storage::sqlite::SqliteBackend::new(path)
                .await
                .with_context(|| format!("failed to open database {}", path.display()))?;
            info!("using SQLite storage at {}", path.display());
            Ok(Repositories::from_backend(Arc::new(backend)))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("SQLite storage requested but the storage-sqlite feature is disabled")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = read_config_file(&args.file)
        .with_context(|| format!("failed to read config file {}", args.file))?;
    init(&config.log_level);
    trace!("started with args: {args:?}");

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let repos = open_storage(&config.storage).await?;

    let dispatcher = AlertDispatcher::from_config(&config.alerts);
    if !dispatcher.has_channels() {
        warn!("no notification channels configured, alerts are only logged");
    }

    let notifier = AlertNotifier::new(
        repos.hosts.clone(),
        repos.alerts.clone(),
        dispatcher,
        &config.alerts,
    );
    let pusher = AgentConfigPusher::new(
        config.metrics.poll_timeout(),
        config.metrics.agent_secret.clone(),
    );
    let roster = RosterService::new(repos.clone(), notifier.clone(), pusher);

    roster
        .seed_initial_data(&config.initial_data)
        .await
        .context("failed to seed initial data")?;
    roster
        .elector()
        .elect_master()
        .await
        .context("initial master election failed")?;
    notifier.refresh_alert_rules().await;

    let cancel = CancellationToken::new();

    let notifier_handle = NotifierHandle::spawn(notifier.clone(), cancel.clone());
    let poller = PollerHandle::spawn(
        repos.hosts.clone(),
        repos.metrics.clone(),
        notifier.clone(),
        &config.metrics,
        cancel.clone(),
    );
    let maintenance = MaintenanceHandle::spawn(
        repos.hosts.clone(),
        repos.metrics.clone(),
        &config.metrics,
        cancel.clone(),
    );

    {
        let roster = roster.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(CONFIG_PUSH_DELAY) => {
                    if let Err(e) = roster.push_all_configs().await {
                        error!("failed to push agent configuration: {e}");
                    }
                }
            }
        });
    }

    #[cfg(feature = "api")]
    if let Some(api) = config.api.clone() {
        let state = fleetwatch::api::ApiState::new(roster.clone(), notifier.clone());
        fleetwatch::api::spawn_api_server(api, state, cancel.clone())
            .await
            .context("failed to start API server")?;
    }

    info!("control plane running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    for (name, result) in [
        ("poller", poller.shutdown().await),
        ("notifier", notifier_handle.shutdown().await),
        ("maintenance", maintenance.shutdown().await),
    ] {
        if let Err(e) = result {
            warn!("{name} already stopped: {e}");
        }
    }
    cancel.cancel();

    if let Err(e) = repos.metrics.close().await {
        error!("failed to close storage: {e}");
    }

    Ok(())
}
