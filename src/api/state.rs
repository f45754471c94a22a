//! API shared state

use chrono::{DateTime, Utc};

use crate::actors::notifier::AlertNotifier;
use crate::roster::RosterService;
use crate::storage::backend::Repositories;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Roster mutations (election, cache invalidation, agent pushes)
    pub roster: RosterService,

    /// Poll counters and rule cache
    pub notifier: AlertNotifier,

    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(roster: RosterService, notifier: AlertNotifier) -> Self {
        Self {
            roster,
            notifier,
            started_at: Utc::now(),
        }
    }

    pub fn repos(&self) -> &Repositories {
        self.roster.repositories()
    }
}
