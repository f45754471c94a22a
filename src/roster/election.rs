//! Master election over the host roster

use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::storage::backend::HostRepository;
use crate::storage::error::StorageResult;
use crate::storage::schema::{Host, HostId};

/// Winner of an election: highest priority, then oldest, then lowest id
pub fn select_master(hosts: &[Host]) -> Option<&Host> {
    hosts.iter().max_by(|a, b| rank(a, b))
}

/// `Greater` means `a` is the better candidate
fn rank(a: &Host, b: &Host) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}

/// Clones share one election lock
#[derive(Clone)]
pub struct MasterElector {
    hosts: Arc<dyn HostRepository>,
    /// Held from reading the roster until the swap commits, so elections
    /// commit in the order they started
    lock: Arc<Mutex<()>>,
}

impl MasterElector {
    pub fn new(hosts: Arc<dyn HostRepository>) -> Self {
        Self {
            hosts,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Recompute the master and persist it atomically
    ///
    /// An empty roster is left as is and yields `None`.
    pub async fn elect_master(&self) -> StorageResult<Option<HostId>> {
        let _guard = self.lock.lock().await;
        let hosts = self.hosts.get_all().await?;

        let Some(winner) = select_master(&hosts) else {
            debug!("no hosts registered, skipping election");
            return Ok(None);
        };

        let previous = hosts.iter().find(|h| h.is_master).map(|h| h.id);
        self.hosts.set_master(winner.id).await?;

        if previous != Some(winner.id) {
            info!(
                host_id = winner.id,
                priority = winner.priority,
                "{} elected master",
                winner.hostname
            );
        }

        Ok(Some(winner.id))
    }
}
