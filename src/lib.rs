pub mod actors;
pub mod alerts;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod email;
pub mod evaluator;
pub mod roster;
pub mod storage;
pub mod telegram;
pub mod util;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::schema::HostId;

/// One agent poll's full metrics payload
///
/// Every section is optional on the wire. A section the agent did not report
/// deserializes to `None` / an empty list and is skipped when persisting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Assigned by the poller after decoding, never read from the agent
    #[serde(default, skip_deserializing)]
    pub host_id: HostId,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemMetrics>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<ProcessInfo>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortInfo>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ContainerInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    #[serde(default)]
    pub cpu: CpuMetrics,
    #[serde(default)]
    pub ram: UsageMetrics,
    #[serde(default)]
    pub disk: UsageMetrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuMetrics {
    pub usage_percent: f64,
}

/// Byte counters plus a usage percentage (RAM, disk)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetrics {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub free: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessInfo {
    #[serde(default)]
    pub pid: i32,
    pub name: String,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_mb: f64,
    #[serde(default, rename = "mem_percent", alias = "memory_percent")]
    pub memory_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortInfo {
    #[serde(alias = "local_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerInfo {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default, rename = "mem_percent", alias = "memory_percent")]
    pub memory_percent: f64,
}
