//! Master election driven by roster changes

use std::sync::Arc;

use fleetwatch::config::{AlertsConfig, HostSeed, InitialData};
use fleetwatch::storage::{NewHost, Repositories, memory::MemoryBackend};

use crate::helpers::*;

fn host(name: &str, priority: i32) -> NewHost {
    NewHost {
        hostname: name.to_string(),
        ip_address: "10.1.0.1".to_string(),
        agent_port: 51243,
        priority,
    }
}

async fn masters(repos: &Repositories) -> Vec<String> {
    repos
        .hosts
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .filter(|h| h.is_master)
        .map(|h| h.hostname)
        .collect()
}

async fn master_handover(repos: Repositories) {
    let h = harness_with(repos, &AlertsConfig::default());

    h.roster.create_host(host("A", 10)).await.unwrap();
    assert_eq!(masters(&h.repos).await, vec!["A"]);

    let b = h.roster.create_host(host("B", 20)).await.unwrap();
    assert_eq!(masters(&h.repos).await, vec!["B"]);

    h.roster.delete_host(b.id).await.unwrap();
    assert_eq!(masters(&h.repos).await, vec!["A"]);
}

#[tokio::test]
async fn test_master_handover_in_memory() {
    master_handover(Repositories::from_backend(Arc::new(MemoryBackend::new()))).await;
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_master_handover_sqlite() {
    use fleetwatch::storage::sqlite::SqliteBackend;

    let dir = tempfile::tempdir().unwrap();
    let backend = SqliteBackend::new(dir.path().join("roster.db")).await.unwrap();
    master_handover(Repositories::from_backend(Arc::new(backend))).await;
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_concurrent_elections_leave_one_master() {
    use fleetwatch::storage::sqlite::SqliteBackend;

    let dir = tempfile::tempdir().unwrap();
    let backend = SqliteBackend::new(dir.path().join("race.db")).await.unwrap();
    let h = harness_with(
        Repositories::from_backend(Arc::new(backend)),
        &AlertsConfig::default(),
    );

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 {
        let roster = h.roster.clone();
        tasks.spawn(async move { roster.create_host(host(&format!("h{i}"), i % 3)).await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let mut elections = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let roster = h.roster.clone();
        elections.spawn(async move { roster.elector().elect_master().await });
    }
    while let Some(result) = elections.join_next().await {
        result.unwrap().unwrap();
    }

    let masters = masters(&h.repos).await;
    assert_eq!(masters.len(), 1);

    // priority 2 hosts are h2 and h5; h2 was not necessarily created first
    assert!(masters[0] == "h2" || masters[0] == "h5");
}

#[tokio::test]
async fn test_seeded_roster_elects_highest_priority() {
    let h = memory_harness(&AlertsConfig::default());
    let seed = |name: &str, priority: i32| HostSeed {
        hostname: name.to_string(),
        ip_address: "10.1.0.2".to_string(),
        agent_port: 51243,
        priority,
        processes: vec![],
        containers: vec![],
        alerts: vec![],
    };

    let created = h
        .roster
        .seed_initial_data(&InitialData {
            hosts: vec![seed("edge", 1), seed("core", 7), seed("backup", 3)],
        })
        .await
        .unwrap();

    assert_eq!(created, 3);
    assert_eq!(masters(&h.repos).await, vec!["core"]);
}
