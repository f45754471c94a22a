//! Roster, alert rule and metric row definitions
//!
//! ## Metrics layout
//!
//! Snapshots are split per category into their own table
//! (`system_metrics`, `process_metrics`, `container_metrics`,
//! `network_metrics`). Each row stores the category section as JSON
//! next to the host id and a millisecond timestamp, so retention can
//! prune every category independently.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MetricsSnapshot;

use super::error::{StorageError, StorageResult};

pub type HostId = i64;

pub type RuleId = i64;

/// Liveness of a host as last observed by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// Never polled since creation
    #[default]
    Pending,
    Active,
    /// Agent unreachable
    Down,
    /// Agent answered with a non-success status
    Unstable,
    /// Request could not be built
    Error,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Pending => "pending",
            HostStatus::Active => "active",
            HostStatus::Down => "down",
            HostStatus::Unstable => "unstable",
            HostStatus::Error => "error",
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(HostStatus::Pending),
            "active" => Ok(HostStatus::Active),
            "down" => Ok(HostStatus::Down),
            "unstable" => Ok(HostStatus::Unstable),
            "error" => Ok(HostStatus::Error),
            other => Err(StorageError::SerializationError(format!(
                "unknown host status: {other}"
            ))),
        }
    }
}

/// A monitored machine and its agent endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub hostname: String,
    pub ip_address: String,
    pub agent_port: u16,
    pub priority: i32,
    pub is_master: bool,
    pub status: HostStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Host {
    /// Absolute URL of an agent endpoint, `path` starting with `/`
    ///
    /// IPv6 literals are bracketed; hostnames are used as given.
    pub fn agent_url(&self, path: &str) -> String {
        match self.ip_address.parse::<IpAddr>() {
            Ok(ip) => format!("http://{}{}", SocketAddr::new(ip, self.agent_port), path),
            Err(_) => format!("http://{}:{}{}", self.ip_address, self.agent_port, path),
        }
    }
}

/// Host fields accepted on creation and update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHost {
    pub hostname: String,
    pub ip_address: String,
    #[serde(default = "crate::util::get_default_port")]
    pub agent_port: u16,
    #[serde(default)]
    pub priority: i32,
}

/// Threshold rule scoped to one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: RuleId,
    pub host_id: HostId,
    /// Dotted metric path, e.g. `system.cpu_usage_percent`
    pub metric_name: String,
    pub threshold_value: f64,
    pub condition: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlertRule {
    pub host_id: HostId,
    pub metric_name: String,
    pub threshold_value: f64,
    pub condition: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchKind {
    Process,
    Container,
}

impl WatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchKind::Process => "process",
            WatchKind::Container => "container",
        }
    }
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A process or container name the agent should report on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub id: i64,
    pub host_id: HostId,
    pub kind: WatchKind,
    pub name: String,
}

/// Independently stored and pruned section of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricCategory {
    System,
    Process,
    Container,
    Network,
}

impl MetricCategory {
    pub const ALL: [MetricCategory; 4] = [
        MetricCategory::System,
        MetricCategory::Process,
        MetricCategory::Container,
        MetricCategory::Network,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            MetricCategory::System => "system_metrics",
            MetricCategory::Process => "process_metrics",
            MetricCategory::Container => "container_metrics",
            MetricCategory::Network => "network_metrics",
        }
    }

    /// JSON payload of this category, `None` when the snapshot lacks it
    pub fn extract(&self, snapshot: &MetricsSnapshot) -> StorageResult<Option<serde_json::Value>> {
        let value = match self {
            MetricCategory::System => match &snapshot.system {
                Some(system) => serde_json::to_value(system),
                None => return Ok(None),
            },
            MetricCategory::Process if snapshot.processes.is_empty() => return Ok(None),
            MetricCategory::Process => serde_json::to_value(&snapshot.processes),
            MetricCategory::Container if snapshot.containers.is_empty() => return Ok(None),
            MetricCategory::Container => serde_json::to_value(&snapshot.containers),
            MetricCategory::Network if snapshot.ports.is_empty() => return Ok(None),
            MetricCategory::Network => serde_json::to_value(&snapshot.ports),
        };

        value.map(Some).map_err(|e| {
            StorageError::SerializationError(format!("failed to serialize {self} metrics: {e}"))
        })
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricCategory::System => "system",
            MetricCategory::Process => "process",
            MetricCategory::Container => "container",
            MetricCategory::Network => "network",
        };
        f.write_str(name)
    }
}

impl FromStr for MetricCategory {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(MetricCategory::System),
            "process" | "processes" => Ok(MetricCategory::Process),
            "container" | "containers" => Ok(MetricCategory::Container),
            "network" | "ports" => Ok(MetricCategory::Network),
            other => Err(StorageError::InvalidConfig(format!(
                "unknown metric category: {other}"
            ))),
        }
    }
}

/// One persisted category section of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMetrics {
    pub host_id: HostId,
    pub timestamp: DateTime<Utc>,
    pub category: MetricCategory,
    pub payload: serde_json::Value,
}

impl StoredMetrics {
    pub fn from_snapshot(
        category: MetricCategory,
        snapshot: &MetricsSnapshot,
    ) -> StorageResult<Option<Self>> {
        Ok(category.extract(snapshot)?.map(|payload| Self {
            host_id: snapshot.host_id,
            timestamp: snapshot.timestamp,
            category,
            payload,
        }))
    }
}
