//! Message types for actor communication
//!
//! Commands travel over an mpsc channel to one actor and carry a oneshot
//! sender for the reply. Reports are plain values and cheap to clone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::storage::schema::MetricCategory;

/// Commands that can be sent to the PollerActor
#[derive(Debug)]
pub enum PollerCommand {
    /// Run a full tick immediately, bypassing the interval timer
    PollNow {
        respond_to: oneshot::Sender<TickSummary>,
    },

    /// Finish the current tick and exit
    Shutdown,
}

/// Outcome of polling a single host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    Success,
    /// The request could not be built; status `error`
    RequestFailed,
    /// Network failure or timeout; status `down`
    Unreachable,
    /// Non-success HTTP status; status `unstable`
    BadStatus(u16),
    /// Body was not a metrics snapshot; status unchanged
    DecodeFailed,
}

impl PollResult {
    pub fn is_success(&self) -> bool {
        matches!(self, PollResult::Success)
    }
}

/// Aggregate result of one poll tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub polled: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Poll outcomes accumulated since the last meta-alert evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCounters {
    pub successes: u64,
    pub failures: u64,
}

impl PollCounters {
    pub fn record(&mut self, success: bool) {
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }

    /// Failure percentage, `None` when the window saw no polls
    pub fn failure_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.failures as f64 * 100.0 / total as f64),
        }
    }
}

/// Commands that can be sent to the NotifierActor
#[derive(Debug)]
pub enum NotifierCommand {
    /// Rebuild the rule cache and reply once it is done
    RefreshRules { respond_to: oneshot::Sender<()> },

    /// Close the current meta-alert window now
    EvaluateFailureRate {
        respond_to: oneshot::Sender<Option<f64>>,
    },

    Shutdown,
}

/// Commands that can be sent to the MaintenanceActor
#[derive(Debug)]
pub enum MaintenanceCommand {
    RunCleanup {
        respond_to: oneshot::Sender<CleanupReport>,
    },

    RunSelfCheck {
        respond_to: oneshot::Sender<SelfCheckReport>,
    },

    Shutdown,
}

/// Result of one retention pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Rows strictly older than this were deleted
    pub threshold: DateTime<Utc>,
    pub deleted: Vec<(MetricCategory, usize)>,
    pub failed: Vec<MetricCategory>,
}

impl CleanupReport {
    pub fn total_deleted(&self) -> usize {
        self.deleted.iter().map(|(_, count)| count).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "hostname", rename_all = "lowercase")]
pub enum MasterHealth {
    Missing,
    /// Master exists but its last poll did not succeed
    Inactive(String),
    Healthy(String),
    /// The host store could not be queried
    Unknown,
}

/// Findings of one self-check pass; never acted upon beyond logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelfCheckReport {
    pub store_reachable: bool,
    /// `None` when the host store could not be queried
    pub active_hosts: Option<usize>,
    pub master: MasterHealth,
}

impl SelfCheckReport {
    pub fn is_healthy(&self) -> bool {
        self.store_reachable
            && self.active_hosts.is_some_and(|n| n > 0)
            && matches!(self.master, MasterHealth::Healthy(_))
    }
}
