//! API response and request bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actors::messages::PollCounters;
use crate::storage::schema::{Host, HostId, MetricCategory, StoredMetrics};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostsResponse {
    pub hosts: Vec<Host>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub timestamp: String,
    pub uptime_secs: i64,
    pub hosts: usize,
    /// Outcomes since the last meta-alert evaluation
    pub polls: PollCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_rate: Option<f64>,
}

/// Time range for history queries, RFC 3339
#[derive(Debug, Deserialize)]
pub struct MetricQuery {
    /// Start time, default: one hour before `to`
    pub from: Option<DateTime<Utc>>,

    /// End time, default: now
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub host_id: HostId,
    pub category: MetricCategory,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub count: usize,
    pub metrics: Vec<StoredMetrics>,
}
