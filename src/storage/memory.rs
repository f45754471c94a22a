//! In-memory storage backend (no persistence)
//!
//! Used when `storage.backend = "none"` and throughout the tests. All
//! state sits behind a single `RwLock`, so the master swap happens inside
//! one write critical section.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::MetricsSnapshot;

use super::backend::{AlertRepository, HostRepository, MetricsRepository, WatchListRepository};
use super::error::{StorageError, StorageResult};
use super::schema::{
    AlertRule, Host, HostId, HostStatus, MetricCategory, NewAlertRule, NewHost, RuleId,
    StoredMetrics, WatchEntry, WatchKind,
};

#[derive(Default)]
struct MemoryState {
    hosts: BTreeMap<HostId, Host>,
    rules: BTreeMap<RuleId, AlertRule>,
    watch_entries: Vec<WatchEntry>,
    metrics: HashMap<MetricCategory, Vec<StoredMetrics>>,
    next_host_id: HostId,
    next_rule_id: RuleId,
    next_watch_id: i64,
}

impl MemoryState {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostRepository for MemoryBackend {
    async fn get_all(&self) -> StorageResult<Vec<Host>> {
        Ok(self.state.read().await.hosts.values().cloned().collect())
    }

    async fn get_by_id(&self, id: HostId) -> StorageResult<Option<Host>> {
        Ok(self.state.read().await.hosts.get(&id).cloned())
    }

    async fn create(&self, host: NewHost) -> StorageResult<Host> {
        let mut state = self.state.write().await;
        let id = MemoryState::next_id(&mut state.next_host_id);
        let now = Utc::now();

        let host = Host {
            id,
            hostname: host.hostname,
            ip_address: host.ip_address,
            agent_port: host.agent_port,
            priority: host.priority,
            is_master: false,
            status: HostStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.hosts.insert(id, host.clone());

        debug!(id, "host created in memory");
        Ok(host)
    }

    async fn update(&self, host: &Host) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let stored = state
            .hosts
            .get_mut(&host.id)
            .ok_or_else(|| StorageError::host_not_found(host.id))?;

        stored.hostname = host.hostname.clone();
        stored.ip_address = host.ip_address.clone();
        stored.agent_port = host.agent_port;
        stored.priority = host.priority;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: HostId) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state
            .hosts
            .remove(&id)
            .ok_or_else(|| StorageError::host_not_found(id))?;

        state.rules.retain(|_, rule| rule.host_id != id);
        state.watch_entries.retain(|entry| entry.host_id != id);
        Ok(())
    }

    async fn update_status(&self, id: HostId, status: HostStatus) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let host = state
            .hosts
            .get_mut(&id)
            .ok_or_else(|| StorageError::host_not_found(id))?;

        host.status = status;
        host.updated_at = Utc::now();
        Ok(())
    }

    async fn get_master(&self) -> StorageResult<Option<Host>> {
        Ok(self
            .state
            .read()
            .await
            .hosts
            .values()
            .find(|h| h.is_master)
            .cloned())
    }

    async fn set_master(&self, id: HostId) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if !state.hosts.contains_key(&id) {
            return Err(StorageError::host_not_found(id));
        }

        for host in state.hosts.values_mut() {
            host.is_master = host.id == id;
        }
        Ok(())
    }
}

#[async_trait]
impl AlertRepository for MemoryBackend {
    async fn get_by_host_id(&self, host_id: HostId) -> StorageResult<Vec<AlertRule>> {
        Ok(self
            .state
            .read()
            .await
            .rules
            .values()
            .filter(|r| r.host_id == host_id)
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: RuleId) -> StorageResult<Option<AlertRule>> {
        Ok(self.state.read().await.rules.get(&id).cloned())
    }

    async fn create(&self, rule: NewAlertRule) -> StorageResult<AlertRule> {
        let mut state = self.state.write().await;
        if !state.hosts.contains_key(&rule.host_id) {
            return Err(StorageError::host_not_found(rule.host_id));
        }

        let id = MemoryState::next_id(&mut state.next_rule_id);
        let rule = AlertRule {
            id,
            host_id: rule.host_id,
            metric_name: rule.metric_name,
            threshold_value: rule.threshold_value,
            condition: rule.condition,
            enabled: rule.enabled,
        };
        state.rules.insert(id, rule.clone());
        Ok(rule)
    }

    async fn update(&self, rule: &AlertRule) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let stored = state
            .rules
            .get_mut(&rule.id)
            .ok_or_else(|| StorageError::rule_not_found(rule.id))?;

        stored.metric_name = rule.metric_name.clone();
        stored.threshold_value = rule.threshold_value;
        stored.condition = rule.condition.clone();
        stored.enabled = rule.enabled;
        Ok(())
    }

    async fn delete(&self, id: RuleId) -> StorageResult<()> {
        self.state
            .write()
            .await
            .rules
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StorageError::rule_not_found(id))
    }

    async fn set_enabled(&self, id: RuleId, enabled: bool) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let rule = state
            .rules
            .get_mut(&id)
            .ok_or_else(|| StorageError::rule_not_found(id))?;
        rule.enabled = enabled;
        Ok(())
    }
}

#[async_trait]
impl WatchListRepository for MemoryBackend {
    async fn list(&self, host_id: HostId, kind: WatchKind) -> StorageResult<Vec<String>> {
        Ok(self
            .state
            .read()
            .await
            .watch_entries
            .iter()
            .filter(|e| e.host_id == host_id && e.kind == kind)
            .map(|e| e.name.clone())
            .collect())
    }

    async fn add(&self, host_id: HostId, kind: WatchKind, name: &str) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if !state.hosts.contains_key(&host_id) {
            return Err(StorageError::host_not_found(host_id));
        }

        let duplicate = state
            .watch_entries
            .iter()
            .any(|e| e.host_id == host_id && e.kind == kind && e.name == name);
        if duplicate {
            return Err(StorageError::InvalidConfig(format!(
                "{kind} '{name}' already watched on host {host_id}"
            )));
        }

        let id = MemoryState::next_id(&mut state.next_watch_id);
        state.watch_entries.push(WatchEntry {
            id,
            host_id,
            kind,
            name: name.to_string(),
        });
        Ok(())
    }

    async fn remove(&self, host_id: HostId, kind: WatchKind, name: &str) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let before = state.watch_entries.len();
        state
            .watch_entries
            .retain(|e| !(e.host_id == host_id && e.kind == kind && e.name == name));

        if state.watch_entries.len() == before {
            return Err(StorageError::NotFound(format!(
                "{kind} '{name}' on host {host_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsRepository for MemoryBackend {
    async fn save_metrics(
        &self,
        category: MetricCategory,
        snapshot: &MetricsSnapshot,
    ) -> StorageResult<()> {
        if let Some(row) = StoredMetrics::from_snapshot(category, snapshot)? {
            self.state
                .write()
                .await
                .metrics
                .entry(category)
                .or_default()
                .push(row);
        }
        Ok(())
    }

    async fn get_metrics_in_range(
        &self,
        category: MetricCategory,
        host_id: HostId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredMetrics>> {
        let state = self.state.read().await;
        let mut rows: Vec<StoredMetrics> = state
            .metrics
            .get(&category)
            .map(|rows| {
                rows.iter()
                    .filter(|m| m.host_id == host_id && m.timestamp >= from && m.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by_key(|m| m.timestamp);
        Ok(rows)
    }

    async fn cleanup_old_metrics(
        &self,
        category: MetricCategory,
        before: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let Some(rows) = state.metrics.get_mut(&category) else {
            return Ok(0);
        };

        let count = rows.len();
        rows.retain(|m| m.timestamp >= before);
        Ok(count - rows.len())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
