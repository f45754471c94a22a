//! PollerActor - Polls every host's agent on a fixed interval
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → load roster → fan-out GET /metrics (bounded) → join
//!                                   │
//!                                   ├─ status update (active/down/unstable/error)
//!                                   ├─ persist each present metric category
//!                                   ├─ record outcome for meta-alerting
//!                                   └─ evaluate cached alert rules
//! ```
//!
//! A tick waits for all of its polls before the next one may start, and
//! ticks missed while a slow tick was running are skipped, so ticks never
//! overlap. Within a tick no ordering between hosts is guaranteed.
//! There is no retry state: a failing host reports the same status on
//! every tick until it recovers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

use crate::MetricsSnapshot;
use crate::config::MetricsConfig;
use crate::storage::backend::{HostRepository, MetricsRepository};
use crate::storage::schema::{Host, HostStatus, MetricCategory};
use crate::util;

use super::messages::{PollResult, PollerCommand, TickSummary};
use super::notifier::AlertNotifier;

/// Everything a single poll task needs, shared across the tick
struct PollContext {
    hosts: Arc<dyn HostRepository>,
    metrics: Arc<dyn MetricsRepository>,
    notifier: AlertNotifier,
    /// HTTP client (reused across requests, carries the per-call timeout)
    client: reqwest::Client,
    secret: Option<String>,
}

impl PollContext {
    /// Poll one agent and apply the outcome
    #[instrument(skip(self, host), fields(host = %host.hostname, host_id = host.id))]
    async fn poll_one(&self, host: Host) -> PollResult {
        let started = Instant::now();
        let result = self.fetch(&host).await;

        let (result, status) = match result {
            Ok(snapshot) => {
                self.handle_snapshot(&host, snapshot).await;
                (PollResult::Success, None)
            }
            Err(PollResult::RequestFailed) => (PollResult::RequestFailed, Some(HostStatus::Error)),
            Err(PollResult::Unreachable) => (PollResult::Unreachable, Some(HostStatus::Down)),
            Err(PollResult::BadStatus(code)) => {
                (PollResult::BadStatus(code), Some(HostStatus::Unstable))
            }
            Err(other) => (other, None),
        };

        if let Some(status) = status {
            self.set_status(&host, status).await;
        }

        if !result.is_success() {
            self.notifier.record_poll_result(host.id, false);
        }

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            ?result,
            "poll finished"
        );
        result
    }

    async fn fetch(&self, host: &Host) -> Result<MetricsSnapshot, PollResult> {
        let url = host.agent_url("/metrics");
        trace!("requesting metrics from {url}");

        let request = util::with_secret(self.client.get(&url), self.secret.as_deref())
            .build()
            .map_err(|e| {
                error!("failed to build request for {url}: {e}");
                PollResult::RequestFailed
            })?;

        let response = self.client.execute(request).await.map_err(|e| {
            warn!("agent unreachable: {e}");
            PollResult::Unreachable
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("agent answered with {status}");
            return Err(PollResult::BadStatus(status.as_u16()));
        }

        response.json::<MetricsSnapshot>().await.map_err(|e| {
            warn!("failed to decode metrics: {e}");
            PollResult::DecodeFailed
        })
    }

    async fn handle_snapshot(&self, host: &Host, mut snapshot: MetricsSnapshot) {
        snapshot.host_id = host.id;

        self.set_status(host, HostStatus::Active).await;

        for category in MetricCategory::ALL {
            let saved = match category {
                MetricCategory::System => self.metrics.save_system_metrics(&snapshot).await,
                MetricCategory::Process => self.metrics.save_process_metrics(&snapshot).await,
                MetricCategory::Container => self.metrics.save_container_metrics(&snapshot).await,
                MetricCategory::Network => self.metrics.save_network_metrics(&snapshot).await,
            };

            if let Err(e) = saved {
                error!("failed to save {category} metrics: {e}");
            }
        }

        self.notifier.record_poll_result(host.id, true);
        self.notifier.check_host_alerts(host, &snapshot).await;
    }

    async fn set_status(&self, host: &Host, status: HostStatus) {
        if let Err(e) = self.hosts.update_status(host.id, status).await {
            error!("failed to set status {status}: {e}");
        }
    }
}

/// Actor that polls the whole roster on every tick
pub struct PollerActor {
    context: Arc<PollContext>,
    command_rx: mpsc::Receiver<PollerCommand>,
    cancel: CancellationToken,
    interval_duration: Duration,
    max_concurrent_polls: usize,
}

impl PollerActor {
    pub fn new(
        hosts: Arc<dyn HostRepository>,
        metrics: Arc<dyn MetricsRepository>,
        notifier: AlertNotifier,
        config: &MetricsConfig,
        command_rx: mpsc::Receiver<PollerCommand>,
        cancel: CancellationToken,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.poll_timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!("falling back to default HTTP client: {e}");
                reqwest::Client::new()
            });

        Self {
            context: Arc::new(PollContext {
                hosts,
                metrics,
                notifier,
                client,
                secret: config.agent_secret.clone(),
            }),
            command_rx,
            cancel,
            interval_duration: config.poll_interval(),
            max_concurrent_polls: config.max_concurrent_polls.max(1),
        }
    }

    /// Run until cancelled, shut down, or the command channel closes
    ///
    /// The first tick fires immediately.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting poller actor");

        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("cancellation requested");
                    break;
                }

                _ = ticker.tick() => {
                    self.poll_all().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        PollerCommand::PollNow { respond_to } => {
                            debug!("received PollNow command");
                            let summary = self.poll_all().await;
                            let _ = respond_to.send(summary);
                        }

                        PollerCommand::Shutdown => {
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

        debug!("poller actor stopped");
    }

    /// One tick: poll every host concurrently and wait for all of them
    #[instrument(skip(self))]
    pub async fn poll_all(&self) -> TickSummary {
        let hosts = match self.context.hosts.get_all().await {
            Ok(hosts) => hosts,
            Err(e) => {
                error!("failed to load hosts, skipping tick: {e}");
                return TickSummary::default();
            }
        };

        let permits = Arc::new(Semaphore::new(self.max_concurrent_polls));
        let mut polls = JoinSet::new();

        for host in hosts {
            let context = self.context.clone();
            let permits = permits.clone();
            polls.spawn(async move {
                // the semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                context.poll_one(host).await
            });
        }

        let mut summary = TickSummary::default();
        while let Some(joined) = polls.join_next().await {
            summary.polled += 1;
            match joined {
                Ok(result) if result.is_success() => summary.succeeded += 1,
                Ok(_) => summary.failed += 1,
                Err(e) => {
                    error!("poll task panicked: {e}");
                    summary.failed += 1;
                }
            }
        }

        debug!(
            polled = summary.polled,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "tick complete"
        );
        summary
    }
}

/// Handle for controlling a PollerActor
#[derive(Clone)]
pub struct PollerHandle {
    sender: mpsc::Sender<PollerCommand>,
}

impl PollerHandle {
    pub fn spawn(
        hosts: Arc<dyn HostRepository>,
        metrics: Arc<dyn MetricsRepository>,
        notifier: AlertNotifier,
        config: &MetricsConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = PollerActor::new(hosts, metrics, notifier, config, cmd_rx, cancel);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a full tick now and wait for its summary
    pub async fn poll_now(&self) -> Result<TickSummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PollerCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(PollerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertDispatcher;
    use crate::config::AlertsConfig;
    use crate::storage::memory::MemoryBackend;
    use crate::storage::schema::NewHost;
    use chrono::{Duration as ChronoDuration, Utc};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        backend: Arc<MemoryBackend>,
        notifier: AlertNotifier,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let notifier = AlertNotifier::new(
            backend.clone(),
            backend.clone(),
            AlertDispatcher::default(),
            &AlertsConfig::default(),
        );
        Fixture { backend, notifier }
    }

    fn actor(f: &Fixture, config: &MetricsConfig) -> PollerActor {
        let (_tx, rx) = mpsc::channel(1);
        PollerActor::new(
            f.backend.clone(),
            f.backend.clone(),
            f.notifier.clone(),
            config,
            rx,
            CancellationToken::new(),
        )
    }

    async fn add_host(backend: &MemoryBackend, ip: &str, port: u16) -> Host {
        HostRepository::create(
            backend,
            NewHost {
                hostname: format!("{ip}:{port}"),
                ip_address: ip.to_string(),
                agent_port: port,
                priority: 0,
            },
        )
        .await
        .unwrap()
    }

    async fn add_mock_host(backend: &MemoryBackend, mock_server: &MockServer) -> Host {
        let mock_url = url::Url::parse(&mock_server.uri()).unwrap();
        add_host(
            backend,
            mock_url.host_str().unwrap(),
            mock_url.port().unwrap(),
        )
        .await
    }

    async fn status_of(backend: &MemoryBackend, host: &Host) -> HostStatus {
        HostRepository::get_by_id(backend, host.id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_successful_poll_persists_present_sections() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "system": {
                    "cpu": { "usage_percent": 12.5 },
                    "ram": { "total": 100, "used": 50, "free": 50, "usage_percent": 50.0 },
                    "disk": { "total": 100, "used": 10, "free": 90, "usage_percent": 10.0 }
                },
                "processes": [
                    { "pid": 1, "name": "nginx", "cpu_percent": 1.0, "memory_mb": 20.0 }
                ]
            })))
            .mount(&mock_server)
            .await;

        let f = fixture();
        let host = add_mock_host(&f.backend, &mock_server).await;

        let summary = actor(&f, &MetricsConfig::default()).poll_all().await;

        assert_eq!(
            summary,
            TickSummary {
                polled: 1,
                succeeded: 1,
                failed: 0
            }
        );
        assert_eq!(status_of(&f.backend, &host).await, HostStatus::Active);

        let from = Utc::now() - ChronoDuration::minutes(1);
        let to = Utc::now() + ChronoDuration::minutes(1);
        let system = f.backend.get_system_metrics_in_range(host.id, from, to).await.unwrap();
        assert_eq!(system.len(), 1);
        assert_eq!(system[0].host_id, host.id);
        let processes = f.backend.get_process_metrics_in_range(host.id, from, to).await.unwrap();
        assert_eq!(processes.len(), 1);
        assert!(
            f.backend
                .get_network_metrics_in_range(host.id, from, to)
                .await
                .unwrap()
                .is_empty()
        );

        assert_eq!(f.notifier.counters().successes, 1);
    }

    #[tokio::test]
    async fn test_non_success_marks_unstable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let f = fixture();
        let host = add_mock_host(&f.backend, &mock_server).await;

        let summary = actor(&f, &MetricsConfig::default()).poll_all().await;

        assert_eq!(summary.failed, 1);
        assert_eq!(status_of(&f.backend, &host).await, HostStatus::Unstable);
        assert_eq!(f.notifier.counters().failures, 1);
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not valid json"))
            .mount(&mock_server)
            .await;

        let f = fixture();
        let host = add_mock_host(&f.backend, &mock_server).await;
        f.backend.update_status(host.id, HostStatus::Active).await.unwrap();

        let summary = actor(&f, &MetricsConfig::default()).poll_all().await;

        assert_eq!(summary.failed, 1);
        assert_eq!(status_of(&f.backend, &host).await, HostStatus::Active);
        assert_eq!(f.notifier.counters().failures, 1);
    }

    #[tokio::test]
    async fn test_unreachable_agent_marks_down() {
        let f = fixture();
        let host = add_host(&f.backend, "127.0.0.1", closed_port()).await;

        let summary = actor(&f, &MetricsConfig::default()).poll_all().await;

        assert_eq!(summary.failed, 1);
        assert_eq!(status_of(&f.backend, &host).await, HostStatus::Down);
    }

    #[tokio::test]
    async fn test_unbuildable_request_marks_error() {
        let f = fixture();
        let host = add_host(&f.backend, "not a host", 80).await;

        actor(&f, &MetricsConfig::default()).poll_all().await;

        assert_eq!(status_of(&f.backend, &host).await, HostStatus::Error);
    }

    #[tokio::test]
    async fn test_tick_counts_mixed_outcomes() {
        let healthy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&healthy)
            .await;

        let f = fixture();
        for _ in 0..3 {
            add_mock_host(&f.backend, &healthy).await;
        }
        add_host(&f.backend, "127.0.0.1", closed_port()).await;
        add_host(&f.backend, "127.0.0.1", closed_port()).await;

        let config = MetricsConfig {
            max_concurrent_polls: 2,
            ..Default::default()
        };
        let summary = actor(&f, &config).poll_all().await;

        assert_eq!(
            summary,
            TickSummary {
                polled: 5,
                succeeded: 3,
                failed: 2
            }
        );
        let counters = f.notifier.counters();
        assert_eq!((counters.successes, counters.failures), (3, 2));
    }

    #[tokio::test]
    async fn test_secret_header_is_sent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .and(header(util::SECRET_HEADER, "s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let f = fixture();
        add_mock_host(&f.backend, &mock_server).await;

        let config = MetricsConfig {
            agent_secret: Some("s3cret".to_string()),
            ..Default::default()
        };
        let summary = actor(&f, &config).poll_all().await;
        assert_eq!(summary.succeeded, 1);
    }

    #[tokio::test]
    async fn test_handle_poll_now_and_cancel() {
        let f = fixture();
        let cancel = CancellationToken::new();
        let config = MetricsConfig {
            poll_interval_secs: 3600,
            ..Default::default()
        };

        let handle = PollerHandle::spawn(
            f.backend.clone(),
            f.backend.clone(),
            f.notifier.clone(),
            &config,
            cancel.clone(),
        );

        assert_eq!(handle.poll_now().await.unwrap(), TickSummary::default());

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.poll_now().await.is_err());
    }
}
