//! Roster service - host, rule and watch-list mutations
//!
//! Every mutation that changes the outcome of an election or the rules of a
//! host runs the follow-up work itself:
//!
//! | Mutation                 | Election | Rule cache | Agent push |
//! |--------------------------|----------|------------|------------|
//! | create / delete host     | yes      | yes        | -          |
//! | update host              | if priority changed | - | -       |
//! | rule create/update/...   | -        | yes        | -          |
//! | watch list add / remove  | -        | -          | full list  |
//!
//! [`RosterService::set_master`] is a manual override; the next election
//! triggered by a roster change may move the master again.

pub mod agent_config;
pub mod election;

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::actors::notifier::AlertNotifier;
use crate::config::InitialData;
use crate::storage::backend::Repositories;
use crate::storage::error::StorageError;
use crate::storage::schema::{AlertRule, Host, HostId, NewAlertRule, NewHost, RuleId, WatchKind};

pub use agent_config::AgentConfigPusher;
pub use election::{MasterElector, select_master};

#[derive(Debug)]
pub enum RosterError {
    Storage(StorageError),
    /// The change was persisted but the agent did not accept the new list
    Push(anyhow::Error),
}

impl fmt::Display for RosterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RosterError::Storage(err) => write!(f, "{err}"),
            RosterError::Push(err) => write!(f, "agent configuration push failed: {err:#}"),
        }
    }
}

impl std::error::Error for RosterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RosterError::Storage(err) => Some(err),
            RosterError::Push(err) => Some(&**err),
        }
    }
}

impl From<StorageError> for RosterError {
    fn from(err: StorageError) -> Self {
        RosterError::Storage(err)
    }
}

pub type RosterResult<T> = Result<T, RosterError>;

#[derive(Clone)]
pub struct RosterService {
    repos: Repositories,
    notifier: AlertNotifier,
    elector: MasterElector,
    pusher: AgentConfigPusher,
}

impl RosterService {
    pub fn new(repos: Repositories, notifier: AlertNotifier, pusher: AgentConfigPusher) -> Self {
        let elector = MasterElector::new(repos.hosts.clone());
        Self {
            repos,
            notifier,
            elector,
            pusher,
        }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn elector(&self) -> &MasterElector {
        &self.elector
    }

    async fn require_host(&self, id: HostId) -> RosterResult<Host> {
        self.repos
            .hosts
            .get_by_id(id)
            .await?
            .ok_or_else(|| StorageError::host_not_found(id).into())
    }

    async fn reload_rules(&self) {
        if let Err(e) = self.notifier.invalidate_alert_rules().await.await {
            error!("rule refresh task failed: {e}");
        }
    }

    pub async fn create_host(&self, host: NewHost) -> RosterResult<Host> {
        let created = self.repos.hosts.create(host).await?;
        info!(host_id = created.id, "registered host {}", created.hostname);

        self.elector.elect_master().await?;
        self.reload_rules().await;

        self.require_host(created.id).await
    }

    /// Replace hostname, address, port and priority of a host
    pub async fn update_host(&self, id: HostId, changes: NewHost) -> RosterResult<Host> {
        let mut host = self.require_host(id).await?;
        let priority_changed = host.priority != changes.priority;

        host.hostname = changes.hostname;
        host.ip_address = changes.ip_address;
        host.agent_port = changes.agent_port;
        host.priority = changes.priority;
        self.repos.hosts.update(&host).await?;

        if priority_changed {
            debug!(host_id = id, "priority changed, re-electing");
            self.elector.elect_master().await?;
        }

        self.require_host(id).await
    }

    pub async fn delete_host(&self, id: HostId) -> RosterResult<()> {
        self.repos.hosts.delete(id).await?;
        info!(host_id = id, "removed host");

        self.elector.elect_master().await?;
        self.reload_rules().await;
        Ok(())
    }

    pub async fn set_master(&self, id: HostId) -> RosterResult<Host> {
        self.repos.hosts.set_master(id).await?;
        warn!(host_id = id, "master set manually");
        self.require_host(id).await
    }

    pub async fn create_rule(&self, rule: NewAlertRule) -> RosterResult<AlertRule> {
        self.require_host(rule.host_id).await?;
        let created = self.repos.alerts.create(rule).await?;
        self.reload_rules().await;
        Ok(created)
    }

    pub async fn update_rule(&self, rule: &AlertRule) -> RosterResult<()> {
        self.repos.alerts.update(rule).await?;
        self.reload_rules().await;
        Ok(())
    }

    pub async fn delete_rule(&self, id: RuleId) -> RosterResult<()> {
        self.repos.alerts.delete(id).await?;
        self.reload_rules().await;
        Ok(())
    }

    pub async fn set_rule_enabled(&self, id: RuleId, enabled: bool) -> RosterResult<()> {
        self.repos.alerts.set_enabled(id, enabled).await?;
        self.reload_rules().await;
        Ok(())
    }

    pub async fn add_process(&self, host_id: HostId, name: &str) -> RosterResult<()> {
        self.add_watch(host_id, WatchKind::Process, name).await
    }

    pub async fn remove_process(&self, host_id: HostId, name: &str) -> RosterResult<()> {
        self.remove_watch(host_id, WatchKind::Process, name).await
    }

    pub async fn add_container(&self, host_id: HostId, name: &str) -> RosterResult<()> {
        self.add_watch(host_id, WatchKind::Container, name).await
    }

    pub async fn remove_container(&self, host_id: HostId, name: &str) -> RosterResult<()> {
        self.remove_watch(host_id, WatchKind::Container, name).await
    }

    async fn add_watch(&self, host_id: HostId, kind: WatchKind, name: &str) -> RosterResult<()> {
        let host = self.require_host(host_id).await?;
        self.repos.watch_lists.add(host_id, kind, name).await?;
        self.push_list(&host, kind).await
    }

    async fn remove_watch(&self, host_id: HostId, kind: WatchKind, name: &str) -> RosterResult<()> {
        let host = self.require_host(host_id).await?;
        self.repos.watch_lists.remove(host_id, kind, name).await?;
        self.push_list(&host, kind).await
    }

    /// Send the stored list of one kind to the host's agent
    async fn push_list(&self, host: &Host, kind: WatchKind) -> RosterResult<()> {
        let names = self.repos.watch_lists.list(host.id, kind).await?;

        self.pusher
            .push(host, kind, &names)
            .await
            .map_err(|e| {
                warn!(host_id = host.id, "{e:#}");
                RosterError::Push(e)
            })
    }

    /// Push both watch lists to every host, returning how many hosts took them
    pub async fn push_all_configs(&self) -> RosterResult<usize> {
        let hosts = self.repos.hosts.get_all().await?;

        let pushes = hosts.iter().map(|host| async move {
            let (processes, containers) = futures::join!(
                self.push_list(host, WatchKind::Process),
                self.push_list(host, WatchKind::Container)
            );
            processes.is_ok() && containers.is_ok()
        });
        let pushed = futures::future::join_all(pushes)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();

        info!("pushed agent configuration to {pushed}/{} hosts", hosts.len());
        Ok(pushed)
    }

    /// Create the configured hosts when the roster is empty
    ///
    /// Returns the number of hosts created. Election runs once at the end.
    pub async fn seed_initial_data(&self, data: &InitialData) -> RosterResult<usize> {
        if data.hosts.is_empty() {
            return Ok(0);
        }

        if !self.repos.hosts.get_all().await?.is_empty() {
            debug!("roster not empty, skipping initial data");
            return Ok(0);
        }

        for seed in &data.hosts {
            let host = self
                .repos
                .hosts
                .create(NewHost {
                    hostname: seed.hostname.clone(),
                    ip_address: seed.ip_address.clone(),
                    agent_port: seed.agent_port,
                    priority: seed.priority,
                })
                .await?;

            let lists = [
                (WatchKind::Process, &seed.processes),
                (WatchKind::Container, &seed.containers),
            ];
            for (kind, names) in lists {
                for name in names {
                    if let Err(e) = self.repos.watch_lists.add(host.id, kind, name).await {
                        warn!(host_id = host.id, "skipping seeded {kind} {name}: {e}");
                    }
                }
            }

            for rule in &seed.alerts {
                self.repos
                    .alerts
                    .create(NewAlertRule {
                        host_id: host.id,
                        metric_name: rule.metric_name.clone(),
                        threshold_value: rule.threshold_value,
                        condition: rule.condition.clone(),
                        enabled: rule.enabled,
                    })
                    .await?;
            }
        }

        self.elector.elect_master().await?;
        info!("seeded {} hosts from configuration", data.hosts.len());
        Ok(data.hosts.len())
    }
}
