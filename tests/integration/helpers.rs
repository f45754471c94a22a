//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fleetwatch::{
    actors::notifier::AlertNotifier,
    alerts::AlertDispatcher,
    config::{AlertsConfig, MetricsConfig, TelegramConfig},
    roster::{AgentConfigPusher, RosterService},
    storage::{NewHost, Repositories, memory::MemoryBackend},
    telegram::TelegramManager,
};
use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};

pub const CHAT_TOKEN: &str = "T";

/// Everything a control plane needs, wired over one backend
pub struct Harness {
    pub repos: Repositories,
    pub notifier: AlertNotifier,
    pub roster: RosterService,
}

pub fn harness_with(repos: Repositories, alerts: &AlertsConfig) -> Harness {
    let notifier = AlertNotifier::new(
        repos.hosts.clone(),
        repos.alerts.clone(),
        AlertDispatcher::from_config(alerts),
        alerts,
    );
    let pusher = AgentConfigPusher::new(Duration::from_secs(2), None);
    let roster = RosterService::new(repos.clone(), notifier.clone(), pusher);

    Harness {
        repos,
        notifier,
        roster,
    }
}

pub fn memory_harness(alerts: &AlertsConfig) -> Harness {
    harness_with(
        Repositories::from_backend(Arc::new(MemoryBackend::new())),
        alerts,
    )
}

/// Alerts configuration sending to a mocked chat API
pub fn alerts_to(chat_server: &MockServer) -> AlertsConfig {
    AlertsConfig {
        telegram: Some(TelegramConfig {
            token: CHAT_TOKEN.to_string(),
            chat_ids: vec!["42".to_string()],
            api_base: chat_server.uri(),
        }),
        ..Default::default()
    }
}

/// Chat API mock accepting any number of messages
pub async fn chat_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;
    server
}

/// Texts of all messages the chat mock received
pub async fn sent_messages(chat_server: &MockServer) -> Vec<String> {
    chat_server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|request| request.body_json::<serde_json::Value>().ok())
        .filter_map(|body| body["text"].as_str().map(str::to_string))
        .collect()
}

/// Host pointing at a mock agent
pub fn agent_host(agent: &MockServer, hostname: &str, priority: i32) -> NewHost {
    let url = url::Url::parse(&agent.uri()).unwrap();
    NewHost {
        hostname: hostname.to_string(),
        ip_address: url.host_str().unwrap().to_string(),
        agent_port: url.port().unwrap(),
        priority,
    }
}

/// Host whose agent port refuses connections
pub fn unreachable_host(hostname: &str, priority: i32) -> NewHost {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    NewHost {
        hostname: hostname.to_string(),
        ip_address: "127.0.0.1".to_string(),
        agent_port: port,
        priority,
    }
}

/// Poll settings that keep the timer out of the way of "run now" commands
pub fn slow_metrics_config() -> MetricsConfig {
    MetricsConfig {
        poll_interval_secs: 3600,
        poll_timeout_secs: 2,
        cleanup_interval_hours: 1000,
        self_check_interval_secs: 3600,
        ..Default::default()
    }
}

pub fn metrics_json(cpu: f64) -> serde_json::Value {
    serde_json::json!({
        "system": {
            "cpu": { "usage_percent": cpu },
            "ram": { "total": 1000, "used": 400, "free": 600, "usage_percent": 40.0 },
            "disk": { "total": 1000, "used": 900, "free": 100, "usage_percent": 90.0 }
        },
        "processes": [
            { "pid": 10, "name": "nginx", "cpu_percent": 3.5, "memory_mb": 120.0, "mem_percent": 1.5 }
        ],
        "containers": [
            { "id": "abc", "name": "api", "image": "api:1", "status": "running",
              "cpu_percent": 12.0, "mem_percent": 8.0 }
        ]
    })
}
