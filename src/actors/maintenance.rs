//! MaintenanceActor - metrics retention and self-diagnosis
//!
//! Two schedules, each on its own task and both running once at start:
//!
//! - **Cleanup**: delete metrics older than `now - metrics_ttl_days`, one
//!   call per category. A failing category is logged and the others still run.
//! - **Self-check**: ping the metrics store, count active hosts and inspect
//!   the current master. Findings are only logged; nothing is mutated.
//!
//! The actor loop itself only serves on-demand runs and shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::MetricsConfig;
use crate::storage::backend::{HostRepository, MetricsRepository};
use crate::storage::schema::{HostStatus, MetricCategory};

use super::messages::{CleanupReport, MaintenanceCommand, MasterHealth, SelfCheckReport};
use super::run_every;

pub struct MaintenanceActor {
    maintenance: Maintenance,
    cleanup_interval: Duration,
    self_check_interval: Duration,
    command_rx: mpsc::Receiver<MaintenanceCommand>,
    cancel: CancellationToken,
}

impl MaintenanceActor {
    pub fn new(
        hosts: Arc<dyn HostRepository>,
        metrics: Arc<dyn MetricsRepository>,
        config: &MetricsConfig,
        command_rx: mpsc::Receiver<MaintenanceCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            maintenance: Maintenance::new(hosts, metrics, config.metrics_ttl_days),
            cleanup_interval: config.cleanup_interval(),
            self_check_interval: config.self_check_interval(),
            command_rx,
            cancel,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            ttl_days = self.maintenance.ttl_days,
            "starting maintenance actor (cleanup every {:?}, self-check every {:?})",
            self.cleanup_interval,
            self.self_check_interval
        );

        let schedules = self.cancel.child_token();
        let mut loops = JoinSet::new();

        let mut cleanup_ticker = interval(self.cleanup_interval);
        cleanup_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let maintenance = self.maintenance.clone();
        loops.spawn(run_every(cleanup_ticker, schedules.clone(), move || {
            let maintenance = maintenance.clone();
            async move {
                maintenance.run_cleanup().await;
            }
        }));

        let mut self_check_ticker = interval(self.self_check_interval);
        self_check_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let maintenance = self.maintenance.clone();
        loops.spawn(run_every(self_check_ticker, schedules.clone(), move || {
            let maintenance = maintenance.clone();
            async move {
                maintenance.run_self_check().await;
            }
        }));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("cancellation requested");
                    break;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        MaintenanceCommand::RunCleanup { respond_to } => {
                            let report = self.maintenance.run_cleanup().await;
                            let _ = respond_to.send(report);
                        }

                        MaintenanceCommand::RunSelfCheck { respond_to } => {
                            let report = self.maintenance.run_self_check().await;
                            let _ = respond_to.send(report);
                        }

                        MaintenanceCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        schedules.cancel();
        while loops.join_next().await.is_some() {}

        debug!("maintenance actor stopped");
    }
}

/// Retention and self-check jobs, shared by both schedules and on-demand runs
#[derive(Clone)]
pub struct Maintenance {
    hosts: Arc<dyn HostRepository>,
    metrics: Arc<dyn MetricsRepository>,
    ttl_days: u32,
}

impl Maintenance {
    pub fn new(
        hosts: Arc<dyn HostRepository>,
        metrics: Arc<dyn MetricsRepository>,
        ttl_days: u32,
    ) -> Self {
        Self {
            hosts,
            metrics,
            ttl_days,
        }
    }

    /// Delete metrics older than the retention window, category by category
    #[instrument(skip(self))]
    pub async fn run_cleanup(&self) -> CleanupReport {
        let threshold = Utc::now() - chrono::Duration::days(i64::from(self.ttl_days));
        let mut report = CleanupReport {
            threshold,
            deleted: Vec::with_capacity(MetricCategory::ALL.len()),
            failed: Vec::new(),
        };

        for category in MetricCategory::ALL {
            match self.metrics.cleanup_old_metrics(category, threshold).await {
                Ok(count) => {
                    debug!("deleted {count} old {category} metrics");
                    report.deleted.push((category, count));
                }
                Err(e) => {
                    error!("failed to clean up {category} metrics: {e}");
                    report.failed.push(category);
                }
            }
        }

        info!(
            deleted = report.total_deleted(),
            failed = report.failed.len(),
            "metrics older than {threshold} cleaned up"
        );
        report
    }

    /// Check store reachability, active hosts and master health
    #[instrument(skip(self))]
    pub async fn run_self_check(&self) -> SelfCheckReport {
        let store_reachable = match self.metrics.ping().await {
            Ok(()) => true,
            Err(e) => {
                error!("metrics store unreachable: {e}");
                false
            }
        };

        let active_hosts = match self.hosts.get_all().await {
            Ok(hosts) => {
                let active = hosts
                    .iter()
                    .filter(|h| h.status == HostStatus::Active)
                    .count();
                if active == 0 {
                    warn!("no active hosts");
                }
                Some(active)
            }
            Err(e) => {
                error!("failed to count active hosts: {e}");
                None
            }
        };

        let master = match self.hosts.get_master().await {
            Ok(None) => {
                error!("no master host elected");
                MasterHealth::Missing
            }
            Ok(Some(master)) if master.status != HostStatus::Active => {
                error!(
                    "master {} is not active (status: {})",
                    master.hostname, master.status
                );
                MasterHealth::Inactive(master.hostname)
            }
            Ok(Some(master)) => MasterHealth::Healthy(master.hostname),
            Err(e) => {
                error!("failed to fetch master host: {e}");
                MasterHealth::Unknown
            }
        };

        let report = SelfCheckReport {
            store_reachable,
            active_hosts,
            master,
        };

        if report.is_healthy() {
            info!("system health verified");
        }
        report
    }
}

/// Handle for controlling a MaintenanceActor
#[derive(Clone)]
pub struct MaintenanceHandle {
    sender: mpsc::Sender<MaintenanceCommand>,
}

impl MaintenanceHandle {
    pub fn spawn(
        hosts: Arc<dyn HostRepository>,
        metrics: Arc<dyn MetricsRepository>,
        config: &MetricsConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = MaintenanceActor::new(hosts, metrics, config, cmd_rx, cancel);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn run_cleanup_now(&self) -> Result<CleanupReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MaintenanceCommand::RunCleanup { respond_to: tx })
            .await
            .context("failed to send RunCleanup command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn run_self_check_now(&self) -> Result<SelfCheckReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MaintenanceCommand::RunSelfCheck { respond_to: tx })
            .await
            .context("failed to send RunSelfCheck command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(MaintenanceCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
