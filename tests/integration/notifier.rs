//! Meta-alerting and rule cache behaviour through the notifier handle

use fleetwatch::{
    actors::notifier::NotifierHandle,
    config::AlertsConfig,
    storage::NewAlertRule,
};
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

fn long_window(chat: &wiremock::MockServer, threshold: f64) -> AlertsConfig {
    AlertsConfig {
        failure_threshold_percent: threshold,
        interval_seconds: 3600,
        rule_refresh_secs: 3600,
        ..alerts_to(chat)
    }
}

#[tokio::test]
async fn test_meta_alert_at_threshold() {
    let chat = chat_server().await;
    let h = memory_harness(&long_window(&chat, 90.0));

    let cancel = CancellationToken::new();
    let handle = NotifierHandle::spawn(h.notifier.clone(), cancel.clone());

    for _ in 0..9 {
        h.notifier.record_poll_result(1, false);
    }
    h.notifier.record_poll_result(2, true);

    assert_eq!(handle.evaluate_now().await.unwrap(), Some(90.0));

    let messages = sent_messages(&chat).await;
    assert_eq!(
        messages,
        vec!["🚨 ALERT Monitoring center failed: 90% failures in last 3600 seconds".to_string()]
    );

    // counters were reset with the window
    assert_eq!(h.notifier.counters().total(), 0);
    cancel.cancel();
}

#[tokio::test]
async fn test_below_threshold_and_empty_window_stay_silent() {
    let chat = chat_server().await;
    let h = memory_harness(&long_window(&chat, 90.0));

    let cancel = CancellationToken::new();
    let handle = NotifierHandle::spawn(h.notifier.clone(), cancel.clone());

    assert_eq!(handle.evaluate_now().await.unwrap(), None);

    h.notifier.record_poll_result(1, false);
    h.notifier.record_poll_result(1, true);
    assert_eq!(handle.evaluate_now().await.unwrap(), Some(50.0));

    assert!(sent_messages(&chat).await.is_empty());
    cancel.cancel();
}

#[tokio::test]
async fn test_refresh_picks_up_rules_written_behind_the_cache() {
    let h = memory_harness(&AlertsConfig::default());
    let host = h.roster.create_host(unreachable_host("db", 0)).await.unwrap();

    // written straight to the store, bypassing invalidation
    let rule = h
        .repos
        .alerts
        .create(NewAlertRule {
            host_id: host.id,
            metric_name: "system.disk_usage_percent".to_string(),
            threshold_value: 95.0,
            condition: ">=".to_string(),
            enabled: true,
        })
        .await
        .unwrap();
    assert!(h.notifier.cached_rules(host.id).await.is_empty());

    let cancel = CancellationToken::new();
    let handle = NotifierHandle::spawn(h.notifier.clone(), cancel.clone());
    handle.refresh_now().await.unwrap();

    assert_eq!(h.notifier.cached_rules(host.id).await, vec![rule]);

    handle.shutdown().await.unwrap();
    cancel.cancel();
}
