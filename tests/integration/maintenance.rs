//! Retention and self-check against a SQLite store

use std::sync::Arc;

use chrono::{Duration, Utc};
use fleetwatch::{
    CpuMetrics, MetricsSnapshot, SystemMetrics,
    actors::{maintenance::MaintenanceHandle, messages::MasterHealth},
    config::{AlertsConfig, MetricsConfig},
    storage::{HostStatus, Repositories, sqlite::SqliteBackend},
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

async fn sqlite_repos(dir: &tempfile::TempDir) -> Repositories {
    let backend = SqliteBackend::new(dir.path().join("maintenance.db"))
        .await
        .unwrap();
    Repositories::from_backend(Arc::new(backend))
}

fn snapshot(host_id: i64, age: Duration) -> MetricsSnapshot {
    MetricsSnapshot {
        host_id,
        timestamp: Utc::now() - age,
        system: Some(SystemMetrics {
            cpu: CpuMetrics {
                usage_percent: 10.0,
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_retention_keeps_recent_rows() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness_with(sqlite_repos(&dir).await, &AlertsConfig::default());
    let host = h.roster.create_host(unreachable_host("db", 1)).await.unwrap();

    let metrics = &h.repos.metrics;
    metrics
        .save_system_metrics(&snapshot(host.id, Duration::days(45)))
        .await
        .unwrap();
    metrics
        .save_system_metrics(&snapshot(host.id, Duration::days(31)))
        .await
        .unwrap();
    metrics
        .save_system_metrics(&snapshot(host.id, Duration::days(2)))
        .await
        .unwrap();

    let config = MetricsConfig {
        metrics_ttl_days: 30,
        ..slow_metrics_config()
    };
    let cancel = CancellationToken::new();
    let maintenance = MaintenanceHandle::spawn(
        h.repos.hosts.clone(),
        h.repos.metrics.clone(),
        &config,
        cancel.clone(),
    );

    let report = maintenance.run_cleanup_now().await.unwrap();
    assert!(report.failed.is_empty());
    assert!(report.threshold < Utc::now() - Duration::days(29));

    let now = Utc::now();
    let remaining = metrics
        .get_system_metrics_in_range(host.id, now - Duration::days(365), now)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].timestamp > now - Duration::days(3));

    cancel.cancel();
}

#[tokio::test]
async fn test_self_check_follows_master_status() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness_with(sqlite_repos(&dir).await, &AlertsConfig::default());

    let cancel = CancellationToken::new();
    let maintenance = MaintenanceHandle::spawn(
        h.repos.hosts.clone(),
        h.repos.metrics.clone(),
        &slow_metrics_config(),
        cancel.clone(),
    );

    let report = maintenance.run_self_check_now().await.unwrap();
    assert!(report.store_reachable);
    assert_eq!(report.active_hosts, Some(0));
    assert_eq!(report.master, MasterHealth::Missing);

    let primary = h.roster.create_host(unreachable_host("primary", 9)).await.unwrap();
    let report = maintenance.run_self_check_now().await.unwrap();
    assert_eq!(report.master, MasterHealth::Inactive("primary".to_string()));

    h.repos
        .hosts
        .update_status(primary.id, HostStatus::Active)
        .await
        .unwrap();
    let report = maintenance.run_self_check_now().await.unwrap();
    assert_eq!(report.master, MasterHealth::Healthy("primary".to_string()));
    assert!(report.is_healthy());

    maintenance.shutdown().await.unwrap();
    cancel.cancel();
}
