//! Repository traits consumed by the control plane
//!
//! The control plane never talks to a database directly. Every store it
//! needs is one of the traits below, so SQLite and the in-memory backend
//! are interchangeable.
//!
//! ## Consistency
//!
//! Stores are treated as externally synchronized: last writer wins,
//! except for [`HostRepository::set_master`] which must clear and set
//! the master flag in a single atomic unit.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::MetricsSnapshot;

use super::error::StorageResult;
use super::schema::{
    AlertRule, Host, HostId, HostStatus, MetricCategory, NewAlertRule, NewHost, RuleId,
    StoredMetrics, WatchKind,
};

#[async_trait]
pub trait HostRepository: Send + Sync {
    /// All hosts, ordered by id
    async fn get_all(&self) -> StorageResult<Vec<Host>>;

    async fn get_by_id(&self, id: HostId) -> StorageResult<Option<Host>>;

    /// Insert a host with status `pending` and no master flag
    async fn create(&self, host: NewHost) -> StorageResult<Host>;

    /// Overwrite hostname, address, port and priority
    ///
    /// Status and master flag are owned by the poller and the elector and
    /// are left untouched.
    async fn update(&self, host: &Host) -> StorageResult<()>;

    async fn delete(&self, id: HostId) -> StorageResult<()>;

    async fn update_status(&self, id: HostId, status: HostStatus) -> StorageResult<()>;

    async fn get_master(&self) -> StorageResult<Option<Host>>;

    /// Atomically clear the master flag on every host and set it on `id`
    ///
    /// Fails with `NotFound` when `id` does not exist, leaving the previous
    /// master in place. No reader may observe zero or several masters.
    async fn set_master(&self, id: HostId) -> StorageResult<()>;
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn get_by_host_id(&self, host_id: HostId) -> StorageResult<Vec<AlertRule>>;

    async fn get_by_id(&self, id: RuleId) -> StorageResult<Option<AlertRule>>;

    async fn create(&self, rule: NewAlertRule) -> StorageResult<AlertRule>;

    async fn update(&self, rule: &AlertRule) -> StorageResult<()>;

    async fn delete(&self, id: RuleId) -> StorageResult<()>;

    async fn set_enabled(&self, id: RuleId, enabled: bool) -> StorageResult<()>;
}

#[async_trait]
pub trait WatchListRepository: Send + Sync {
    /// Watched names of one kind, in insertion order
    async fn list(&self, host_id: HostId, kind: WatchKind) -> StorageResult<Vec<String>>;

    /// Fails with `InvalidConfig` when the name is already watched
    async fn add(&self, host_id: HostId, kind: WatchKind, name: &str) -> StorageResult<()>;

    async fn remove(&self, host_id: HostId, kind: WatchKind, name: &str) -> StorageResult<()>;
}

/// Write-once, time-partitioned metric storage
#[async_trait]
pub trait MetricsRepository: Send + Sync {
    /// Persist one category of a snapshot; a missing section is a no-op
    async fn save_metrics(
        &self,
        category: MetricCategory,
        snapshot: &MetricsSnapshot,
    ) -> StorageResult<()>;

    async fn save_system_metrics(&self, snapshot: &MetricsSnapshot) -> StorageResult<()> {
        self.save_metrics(MetricCategory::System, snapshot).await
    }

    async fn save_process_metrics(&self, snapshot: &MetricsSnapshot) -> StorageResult<()> {
        self.save_metrics(MetricCategory::Process, snapshot).await
    }

    async fn save_container_metrics(&self, snapshot: &MetricsSnapshot) -> StorageResult<()> {
        self.save_metrics(MetricCategory::Container, snapshot).await
    }

    async fn save_network_metrics(&self, snapshot: &MetricsSnapshot) -> StorageResult<()> {
        self.save_metrics(MetricCategory::Network, snapshot).await
    }

    /// Rows of one category with `from <= timestamp <= to`, oldest first
    async fn get_metrics_in_range(
        &self,
        category: MetricCategory,
        host_id: HostId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredMetrics>>;

    async fn get_system_metrics_in_range(
        &self,
        host_id: HostId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredMetrics>> {
        self.get_metrics_in_range(MetricCategory::System, host_id, from, to)
            .await
    }

    async fn get_process_metrics_in_range(
        &self,
        host_id: HostId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredMetrics>> {
        self.get_metrics_in_range(MetricCategory::Process, host_id, from, to)
            .await
    }

    async fn get_container_metrics_in_range(
        &self,
        host_id: HostId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredMetrics>> {
        self.get_metrics_in_range(MetricCategory::Container, host_id, from, to)
            .await
    }

    async fn get_network_metrics_in_range(
        &self,
        host_id: HostId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredMetrics>> {
        self.get_metrics_in_range(MetricCategory::Network, host_id, from, to)
            .await
    }

    /// Delete rows of one category older than `before`, returning the count
    async fn cleanup_old_metrics(
        &self,
        category: MetricCategory,
        before: DateTime<Utc>,
    ) -> StorageResult<usize>;

    /// Lightweight reachability check
    async fn ping(&self) -> StorageResult<()>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}

/// The four stores, usually backed by one backend instance
#[derive(Clone)]
pub struct Repositories {
    pub hosts: Arc<dyn HostRepository>,
    pub alerts: Arc<dyn AlertRepository>,
    pub watch_lists: Arc<dyn WatchListRepository>,
    pub metrics: Arc<dyn MetricsRepository>,
}

impl Repositories {
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: HostRepository + AlertRepository + WatchListRepository + MetricsRepository + 'static,
    {
        Self {
            hosts: backend.clone(),
            alerts: backend.clone(),
            watch_lists: backend.clone(),
            metrics: backend,
        }
    }
}
