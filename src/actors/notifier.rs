//! Alert Notifier - rule cache, per-poll rule evaluation and meta-alerting
//!
//! ## Rule cache
//!
//! ```text
//! refresh:     hosts ──► rules per host ──► HashMap<HostId, Vec<AlertRule>> (swapped wholesale)
//! invalidate:  clear cache now ──► spawn refresh
//! check:       read cached rules for host ──► evaluate ──► dispatch on trigger
//! ```
//!
//! A check that runs between an invalidation and the end of the following
//! refresh sees no rules for the host and does nothing. Callers that need
//! the new rules in effect await the handle returned by
//! [`AlertNotifier::invalidate_alert_rules`].
//!
//! ## Meta-alerting
//!
//! The poller reports every poll outcome. On each meta tick the counters
//! are read and reset in one step (fixed window), and a meta-alert goes out
//! when the failure rate reaches the configured threshold. A window with
//! no polls is skipped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::MetricsSnapshot;
use crate::alerts::AlertDispatcher;
use crate::config::AlertsConfig;
use crate::evaluator::{self, Evaluation};
use crate::storage::backend::{AlertRepository, HostRepository};
use crate::storage::schema::{AlertRule, Host, HostId};

use super::messages::{NotifierCommand, PollCounters};
use super::run_every;

struct NotifierState {
    hosts: Arc<dyn HostRepository>,
    alerts: Arc<dyn AlertRepository>,
    dispatcher: AlertDispatcher,
    rules: RwLock<HashMap<HostId, Vec<AlertRule>>>,
    /// Separate from the rule cache lock, never held across an await
    counters: Mutex<PollCounters>,
    failure_threshold_percent: f64,
    interval_seconds: u64,
    rule_refresh: Duration,
}

/// Shared notifier state; clones refer to the same cache and counters
#[derive(Clone)]
pub struct AlertNotifier {
    state: Arc<NotifierState>,
}

impl AlertNotifier {
    pub fn new(
        hosts: Arc<dyn HostRepository>,
        alerts: Arc<dyn AlertRepository>,
        dispatcher: AlertDispatcher,
        config: &AlertsConfig,
    ) -> Self {
        Self {
            state: Arc::new(NotifierState {
                hosts,
                alerts,
                dispatcher,
                rules: RwLock::new(HashMap::new()),
                counters: Mutex::new(PollCounters::default()),
                failure_threshold_percent: config.failure_threshold_percent,
                interval_seconds: config.interval_seconds.max(1),
                rule_refresh: Duration::from_secs(config.rule_refresh_secs.max(1)),
            }),
        }
    }

    /// Rebuild the whole rule cache from the repositories
    ///
    /// If the host list cannot be fetched the current cache is kept. A host
    /// whose rules fail to load is left out of the new cache.
    #[instrument(skip(self))]
    pub async fn refresh_alert_rules(&self) {
        let hosts = match self.state.hosts.get_all().await {
            Ok(hosts) => hosts,
            Err(e) => {
                error!("failed to load hosts for rule refresh: {e}");
                return;
            }
        };

        let mut rules = HashMap::with_capacity(hosts.len());
        for host in &hosts {
            match self.state.alerts.get_by_host_id(host.id).await {
                Ok(host_rules) => {
                    rules.insert(host.id, host_rules);
                }
                Err(e) => error!(host_id = host.id, "failed to load alert rules: {e}"),
            }
        }

        let total: usize = rules.values().map(Vec::len).sum();
        *self.state.rules.write().await = rules;

        debug!(hosts = hosts.len(), rules = total, "alert rule cache refreshed");
    }

    /// Clear the cache and refresh it in the background
    pub async fn invalidate_alert_rules(&self) -> JoinHandle<()> {
        self.state.rules.write().await.clear();
        trace!("alert rule cache invalidated");

        let notifier = self.clone();
        tokio::spawn(async move { notifier.refresh_alert_rules().await })
    }

    pub async fn cached_rules(&self, host_id: HostId) -> Vec<AlertRule> {
        self.state
            .rules
            .read()
            .await
            .get(&host_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Evaluate the host's cached rules against a fresh snapshot
    ///
    /// Returns the number of alerts dispatched.
    #[instrument(skip(self, host, snapshot), fields(host = %host.hostname))]
    pub async fn check_host_alerts(&self, host: &Host, snapshot: &MetricsSnapshot) -> usize {
        let rules = self.cached_rules(host.id).await;
        if rules.is_empty() {
            trace!("no cached alert rules");
            return 0;
        }

        let mut fired = 0;
        for rule in rules.iter().filter(|r| r.enabled) {
            match evaluator::evaluate(snapshot, rule) {
                Evaluation::Value {
                    triggered: true,
                    current,
                } => {
                    let message = rule_alert_message(host, rule, &current);
                    info!(rule_id = rule.id, "{message}");
                    self.state.dispatcher.dispatch(&message).await;
                    fired += 1;
                }
                Evaluation::Value { .. } => {}
                Evaluation::Unresolved(reason) => {
                    debug!(rule_id = rule.id, metric = %rule.metric_name, "rule not evaluated: {reason}");
                }
            }
        }

        fired
    }

    pub fn record_poll_result(&self, host_id: HostId, success: bool) {
        trace!(host_id, success, "poll outcome recorded");
        self.lock_counters().record(success);
    }

    pub fn counters(&self) -> PollCounters {
        *self.lock_counters()
    }

    /// Close the current window: read and reset counters, alert on threshold
    ///
    /// Returns the window's failure rate, `None` when nothing was polled.
    #[instrument(skip(self))]
    pub async fn evaluate_failure_rate(&self) -> Option<f64> {
        let (rate, message) = self.close_window()?;
        if let Some(message) = message {
            self.state.dispatcher.dispatch(&message).await;
        }
        Some(rate)
    }

    /// Take the counters and compute the rate; the message is set when the
    /// threshold is reached
    fn close_window(&self) -> Option<(f64, Option<String>)> {
        let window = std::mem::take(&mut *self.lock_counters());

        let Some(rate) = window.failure_rate() else {
            trace!("no polls in window, skipping meta-alert check");
            return None;
        };

        debug!(
            successes = window.successes,
            failures = window.failures,
            "poll failure rate {rate:.2}%"
        );

        if rate < self.state.failure_threshold_percent {
            return Some((rate, None));
        }

        let message = format!(
            "🚨 ALERT Monitoring center failed: {:.0}% failures in last {} seconds",
            rate, self.state.interval_seconds
        );
        warn!("{message}");
        Some((rate, Some(message)))
    }

    fn lock_counters(&self) -> std::sync::MutexGuard<'_, PollCounters> {
        self.state
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn rule_alert_message(host: &Host, rule: &AlertRule, current: &str) -> String {
    format!(
        "🔔 ALERT: Host {} ({}): {} {} {:.2} (current: {})",
        host.hostname,
        host.ip_address,
        rule.metric_name,
        rule.condition,
        rule.threshold_value,
        current
    )
}

/// Actor driving the meta-alert window and the periodic rule refresh
///
/// Each schedule runs on its own task; a slow refresh never delays the
/// end of a meta-alert window.
pub struct NotifierActor {
    notifier: AlertNotifier,
    command_rx: mpsc::Receiver<NotifierCommand>,
    cancel: CancellationToken,
}

impl NotifierActor {
    pub fn new(
        notifier: AlertNotifier,
        command_rx: mpsc::Receiver<NotifierCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            notifier,
            command_rx,
            cancel,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting notifier actor");

        let schedules = self.cancel.child_token();
        let mut loops = JoinSet::new();

        let window = Duration::from_secs(self.notifier.state.interval_seconds);
        // the first window closes one full interval after start
        let meta_ticker = interval_at(Instant::now() + window, window);
        let notifier = self.notifier.clone();
        loops.spawn(run_every(meta_ticker, schedules.clone(), move || {
            let notifier = notifier.clone();
            async move {
                // sending must not stretch the next window
                if let Some((_, Some(message))) = notifier.close_window() {
                    tokio::spawn(async move {
                        notifier.state.dispatcher.dispatch(&message).await;
                    });
                }
            }
        }));

        let refresh_ticker = interval(self.notifier.state.rule_refresh);
        let notifier = self.notifier.clone();
        loops.spawn(run_every(refresh_ticker, schedules.clone(), move || {
            let notifier = notifier.clone();
            async move { notifier.refresh_alert_rules().await }
        }));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("cancellation requested");
                    break;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        NotifierCommand::RefreshRules { respond_to } => {
                            self.notifier.refresh_alert_rules().await;
                            let _ = respond_to.send(());
                        }

                        NotifierCommand::EvaluateFailureRate { respond_to } => {
                            let rate = self.notifier.evaluate_failure_rate().await;
                            let _ = respond_to.send(rate);
                        }

                        NotifierCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        schedules.cancel();
        while loops.join_next().await.is_some() {}

        debug!("notifier actor stopped");
    }
}

/// Handle for controlling a NotifierActor
#[derive(Clone)]
pub struct NotifierHandle {
    sender: mpsc::Sender<NotifierCommand>,
    notifier: AlertNotifier,
}

impl NotifierHandle {
    pub fn spawn(notifier: AlertNotifier, cancel: CancellationToken) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = NotifierActor::new(notifier.clone(), cmd_rx, cancel);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            notifier,
        }
    }

    pub fn notifier(&self) -> &AlertNotifier {
        &self.notifier
    }

    pub async fn refresh_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(NotifierCommand::RefreshRules { respond_to: tx })
            .await
            .context("failed to send RefreshRules command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn evaluate_now(&self) -> Result<Option<f64>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(NotifierCommand::EvaluateFailureRate { respond_to: tx })
            .await
            .context("failed to send EvaluateFailureRate command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(NotifierCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
