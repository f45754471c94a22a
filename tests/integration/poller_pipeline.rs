//! Poll → persist → evaluate → notify, through the poller handle

use chrono::{Duration, Utc};
use fleetwatch::{
    actors::{messages::TickSummary, poller::PollerHandle},
    storage::{HostStatus, MetricCategory, NewAlertRule},
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_tick_updates_status_persists_and_alerts() {
    let agent = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metrics_json(95.0)))
        .mount(&agent)
        .await;
    let chat = chat_server().await;

    let h = memory_harness(&alerts_to(&chat));
    let web = h.roster.create_host(agent_host(&agent, "web-1", 5)).await.unwrap();
    let gone = h.roster.create_host(unreachable_host("gone", 1)).await.unwrap();

    h.roster
        .create_rule(NewAlertRule {
            host_id: web.id,
            metric_name: "system.cpu_usage_percent".to_string(),
            threshold_value: 80.0,
            condition: ">".to_string(),
            enabled: true,
        })
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let poller = PollerHandle::spawn(
        h.repos.hosts.clone(),
        h.repos.metrics.clone(),
        h.notifier.clone(),
        &slow_metrics_config(),
        cancel.clone(),
    );

    let summary = poller.poll_now().await.unwrap();
    assert_eq!(
        summary,
        TickSummary {
            polled: 2,
            succeeded: 1,
            failed: 1,
        }
    );

    let web_now = h.repos.hosts.get_by_id(web.id).await.unwrap().unwrap();
    let gone_now = h.repos.hosts.get_by_id(gone.id).await.unwrap().unwrap();
    assert_eq!(web_now.status, HostStatus::Active);
    assert_eq!(gone_now.status, HostStatus::Down);

    let now = Utc::now();
    for category in [
        MetricCategory::System,
        MetricCategory::Process,
        MetricCategory::Container,
    ] {
        let rows = h
            .repos
            .metrics
            .get_metrics_in_range(category, web.id, now - Duration::minutes(1), now)
            .await
            .unwrap();
        assert!(!rows.is_empty(), "no {category} rows stored");
    }

    let network = h
        .repos
        .metrics
        .get_network_metrics_in_range(web.id, now - Duration::minutes(1), now)
        .await
        .unwrap();
    assert!(network.is_empty());

    let messages = sent_messages(&chat).await;
    assert!(messages.iter().any(|m| m.starts_with(
        "🔔 ALERT: Host web-1 (127.0.0.1): system.cpu_usage_percent > 80.00 (current: 95.00%)"
    )));

    let counters = h.notifier.counters();
    assert!(counters.successes >= 1);
    assert!(counters.failures >= 1);

    cancel.cancel();
}

#[tokio::test]
async fn test_bad_status_and_garbage_body() {
    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&broken)
        .await;

    let garbled = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&garbled)
        .await;

    let h = memory_harness(&Default::default());
    let a = h.roster.create_host(agent_host(&broken, "a", 1)).await.unwrap();
    let b = h.roster.create_host(agent_host(&garbled, "b", 1)).await.unwrap();

    let cancel = CancellationToken::new();
    let poller = PollerHandle::spawn(
        h.repos.hosts.clone(),
        h.repos.metrics.clone(),
        h.notifier.clone(),
        &slow_metrics_config(),
        cancel.clone(),
    );

    let summary = poller.poll_now().await.unwrap();
    assert_eq!(summary.failed, 2);

    let a_now = h.repos.hosts.get_by_id(a.id).await.unwrap().unwrap();
    let b_now = h.repos.hosts.get_by_id(b.id).await.unwrap().unwrap();
    assert_eq!(a_now.status, HostStatus::Unstable);
    assert_eq!(b_now.status, HostStatus::Pending);

    poller.shutdown().await.unwrap();
    cancel.cancel();
}

#[tokio::test]
async fn test_disabled_rule_stays_silent() {
    let agent = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metrics_json(99.0)))
        .mount(&agent)
        .await;
    let chat = chat_server().await;

    let h = memory_harness(&alerts_to(&chat));
    let web = h.roster.create_host(agent_host(&agent, "web-1", 0)).await.unwrap();
    let rule = h
        .roster
        .create_rule(NewAlertRule {
            host_id: web.id,
            metric_name: "system.cpu_usage_percent".to_string(),
            threshold_value: 50.0,
            condition: ">".to_string(),
            enabled: true,
        })
        .await
        .unwrap();
    h.roster.set_rule_enabled(rule.id, false).await.unwrap();

    let cancel = CancellationToken::new();
    let poller = PollerHandle::spawn(
        h.repos.hosts.clone(),
        h.repos.metrics.clone(),
        h.notifier.clone(),
        &slow_metrics_config(),
        cancel.clone(),
    );
    poller.poll_now().await.unwrap();

    assert!(sent_messages(&chat).await.is_empty());
    cancel.cancel();
}
