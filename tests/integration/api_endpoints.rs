//! HTTP surface over a live server bound to an ephemeral port

use std::net::SocketAddr;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use fleetwatch::{
    CpuMetrics, MetricsSnapshot, SystemMetrics,
    api::{ApiState, spawn_api_server},
    config::{AlertsConfig, ApiSettings},
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

const TOKEN: &str = "test-token";

struct TestApi {
    addr: SocketAddr,
    harness: Harness,
    client: reqwest::Client,
    _cancel: tokio_util::sync::DropGuard,
}

impl TestApi {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(TOKEN)
    }
}

async fn spawn_test_api() -> TestApi {
    let harness = memory_harness(&AlertsConfig::default());
    let state = ApiState::new(harness.roster.clone(), harness.notifier.clone());

    let config = ApiSettings {
        bind: "127.0.0.1:0".parse().unwrap(),
        auth_token: Some(TOKEN.to_string()),
        enable_cors: true,
    };

    let cancel = CancellationToken::new();
    let addr = spawn_api_server(config, state, cancel.clone()).await.unwrap();

    TestApi {
        addr,
        harness,
        client: reqwest::Client::new(),
        _cancel: cancel.drop_guard(),
    }
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let api = spawn_test_api().await;

    let response = api.client.get(api.url("/api/v1/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_auth_rejections() {
    let api = spawn_test_api().await;

    let response = api.client.get(api.url("/api/v1/hosts")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = api
        .client
        .get(api.url("/api/v1/hosts"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_host_lifecycle_moves_master() {
    let api = spawn_test_api().await;

    let response = api
        .client
        .post(api.url("/api/v1/hosts"))
        .bearer_auth(TOKEN)
        .json(&json!({"hostname": "a", "ip_address": "10.0.0.1", "priority": 10}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let a: Value = response.json().await.unwrap();
    assert_eq!(a["status"], "pending");
    assert_eq!(a["agent_port"], 51243);
    assert_eq!(a["is_master"], true);

    let response = api
        .client
        .post(api.url("/api/v1/hosts"))
        .bearer_auth(TOKEN)
        .json(&json!({"hostname": "b", "ip_address": "10.0.0.2", "priority": 20}))
        .send()
        .await
        .unwrap();
    let b: Value = response.json().await.unwrap();

    let master: Value = api.get("/api/v1/master").send().await.unwrap().json().await.unwrap();
    assert_eq!(master["hostname"], "b");

    let response = api
        .client
        .put(api.url(&format!("/api/v1/hosts/{}", b["id"])))
        .bearer_auth(TOKEN)
        .json(&json!({"hostname": "b", "ip_address": "10.0.0.2", "priority": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let master: Value = api.get("/api/v1/master").send().await.unwrap().json().await.unwrap();
    assert_eq!(master["hostname"], "a");

    let response = api
        .client
        .put(api.url(&format!("/api/v1/master/{}", b["id"])))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = api
        .client
        .delete(api.url(&format!("/api/v1/hosts/{}", b["id"])))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let hosts: Value = api.get("/api/v1/hosts").send().await.unwrap().json().await.unwrap();
    assert_eq!(hosts["count"], 1);
    assert_eq!(hosts["hosts"][0]["is_master"], true);
}

#[tokio::test]
async fn test_not_found_and_bad_requests() {
    let api = spawn_test_api().await;

    let response = api.get("/api/v1/master").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = api
        .client
        .delete(api.url("/api/v1/hosts/99"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "host 99 not found");

    let response = api
        .client
        .post(api.url("/api/v1/hosts"))
        .bearer_auth(TOKEN)
        .json(&json!({"hostname": "", "ip_address": "10.0.0.1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = api.get("/api/v1/hosts/1/metrics/cpu").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_history_range() {
    let api = spawn_test_api().await;
    let host = api
        .harness
        .roster
        .create_host(unreachable_host("db", 0))
        .await
        .unwrap();

    for age in [Duration::hours(3), Duration::minutes(10)] {
        let snapshot = MetricsSnapshot {
            host_id: host.id,
            timestamp: Utc::now() - age,
            system: Some(SystemMetrics {
                cpu: CpuMetrics {
                    usage_percent: 33.0,
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        api.harness
            .repos
            .metrics
            .save_system_metrics(&snapshot)
            .await
            .unwrap();
    }

    let path = format!("/api/v1/hosts/{}/metrics/system", host.id);
    let body: Value = api.get(&path).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["category"], "system");
    assert_eq!(body["metrics"][0]["payload"]["cpu"]["usage_percent"], 33.0);

    let from = (Utc::now() - Duration::hours(4)).format("%Y-%m-%dT%H:%M:%SZ");
    let body: Value = api
        .get(&format!("{path}?from={from}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 2);

    let response = api.get("/api/v1/hosts/999/metrics/system").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stats_and_rule_reload() {
    let api = spawn_test_api().await;
    api.harness.notifier.record_poll_result(1, true);
    api.harness.notifier.record_poll_result(1, false);

    let stats: Value = api.get("/api/v1/stats").send().await.unwrap().json().await.unwrap();
    assert_eq!(stats["polls"]["successes"], 1);
    assert_eq!(stats["polls"]["failures"], 1);
    assert_eq!(stats["failure_rate"], 50.0);

    // reading stats does not close the meta-alert window
    assert_eq!(api.harness.notifier.counters().total(), 2);

    let response = api
        .client
        .post(api.url("/api/v1/rules/reload"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
