//! Persistence tests for the SQLite status store
//!
//! These tests verify that:
//! - Status, heartbeats and transitions survive a restart
//! - A restarted pipeline picks up where the old one stopped

use chrono::Duration;
use server_liveness::{
    MonitoringEvent, ServerStatus,
    clock::Clock,
    config::{Config, StorageConfig},
    pipeline::Pipeline,
    storage::{self, StatusStore, sqlite::SqliteStore},
};
use tempfile::tempdir;

use crate::helpers::*;

#[tokio::test]
async fn test_status_survives_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("liveness.db");
    let now = base_time();

    {
        let store = SqliteStore::new(&db_path).await.unwrap();
        store.register_server(registration("web-1", 10)).await.unwrap();
        store.register_server(registration("web-2", 10)).await.unwrap();
        let seen = now - Duration::seconds(45);
        store.record_heartbeat("web-1", seen, seen).await.unwrap();
        assert!(
            store
                .demote_if_stale("web-1", now - Duration::seconds(20), now)
                .await
                .unwrap()
        );
        store.close().await.unwrap();
    }

    let store = SqliteStore::new(&db_path).await.unwrap();

    let web1 = store.get_server("web-1").await.unwrap().unwrap();
    assert_eq!(web1.status, ServerStatus::Off);
    assert_eq!(web1.last_seen, Some(now - Duration::seconds(45)));
    assert_eq!(web1.status_changed_at, Some(now));

    let web2 = store.get_server("web-2").await.unwrap().unwrap();
    assert_eq!(web2.status, ServerStatus::Undefined);

    let transitions = store
        .transitions_between(now - Duration::hours(1), now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[1].to, ServerStatus::Off);

    let before = store
        .last_transition_before("web-1", now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before.to, ServerStatus::On);
}

#[tokio::test]
async fn test_reregistration_keeps_status() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("liveness.db");

    let store = SqliteStore::new(&db_path).await.unwrap();
    store.register_server(registration("web-1", 10)).await.unwrap();
    store.record_heartbeat("web-1", base_time(), base_time()).await.unwrap();

    store.register_server(registration("web-1", 30)).await.unwrap();

    let record = store.get_server("web-1").await.unwrap().unwrap();
    assert_eq!(record.interval_seconds, 30);
    assert_eq!(record.status, ServerStatus::On);
    assert_eq!(record.last_seen, Some(base_time()));
}

#[tokio::test]
async fn test_pipeline_restart_over_sqlite() {
    let dir = tempdir().unwrap();
    let storage_config = StorageConfig::Sqlite {
        path: dir.path().join("liveness.db"),
        retention_days: 7,
    };

    let config = Config {
        servers: vec![server("web-1", 10)],
        storage: storage_config.clone(),
        ..Config::default()
    };

    let store = storage::open(&storage_config).await.unwrap();
    let pipeline = Pipeline::with_store(config.clone(), store.clone(), Clock::new()).unwrap();
    pipeline.start().await.unwrap();
    let seen_at = chrono::Utc::now();
    pipeline
        .producer()
        .publish(&MonitoringEvent::heartbeat("web-1", seen_at))
        .await
        .unwrap();
    assert!(wait_for_status(store.as_ref(), "web-1", ServerStatus::On).await);
    pipeline.shutdown().await.unwrap();

    let pipeline = Pipeline::build(config).await.unwrap();
    pipeline.start().await.unwrap();

    assert_eq!(
        pipeline.get_server_status("web-1").await.unwrap(),
        Some(ServerStatus::On)
    );
    let record = pipeline.store().get_server("web-1").await.unwrap().unwrap();
    assert_eq!(
        record.last_seen.map(|t| t.timestamp_millis()),
        Some(seen_at.timestamp_millis())
    );

    pipeline.shutdown().await.unwrap();
}
