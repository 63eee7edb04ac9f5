//! Concurrency and race condition tests
//!
//! These tests verify that:
//! - Heartbeats from many servers are applied in parallel without loss
//! - `last_seen` never moves backwards under concurrent delivery
//! - A heartbeat landing mid-pass wins over the demotion
//! - Worker passes never overlap

use std::sync::Arc;
use std::sync::atomic::Ordering;

use assert_matches::assert_matches;
use chrono::Duration;
use futures::future::join_all;
use server_liveness::{
    MonitoringEvent, ServerStatus,
    actors::{MonitoringWorker, PassOutcome},
    clock::Clock,
    config::MonitoringConfig,
    pipeline::Pipeline,
    storage::{MemoryStore, StatusStore},
};

use crate::helpers::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_servers_concurrent_heartbeats() {
    let store = Arc::new(MemoryStore::new());
    let servers = (0..50).map(|i| server(&format!("node-{i:02}"), 30)).collect();
    let pipeline = Pipeline::with_store(test_config(servers), store.clone(), Clock::new()).unwrap();
    pipeline.start().await.unwrap();

    let now = chrono::Utc::now();
    let publishers = (0..50).map(|i| {
        let producer = pipeline.producer();
        tokio::spawn(async move {
            for n in 0..10 {
                let event = MonitoringEvent::heartbeat(
                    format!("node-{i:02}"),
                    now + Duration::milliseconds(n),
                );
                producer.publish(&event).await.unwrap();
            }
        })
    });
    for result in join_all(publishers).await {
        result.unwrap();
    }

    for i in 0..50 {
        let id = format!("node-{i:02}");
        assert!(wait_for_status(store.as_ref(), &id, ServerStatus::On).await);
    }

    let mut settled = false;
    for _ in 0..500 {
        let servers = store.list_servers().await.unwrap();
        if servers
            .iter()
            .all(|r| r.last_seen == Some(now + Duration::milliseconds(9)))
        {
            settled = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(settled, "every server should end on its newest heartbeat");

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_out_of_order_heartbeats_keep_newest() {
    let store = Arc::new(MemoryStore::new());
    store.register_server(registration("web-1", 10)).await.unwrap();
    let base = base_time();

    // Interleave early and late timestamps across tasks
    let tasks = (0..100i64).map(|n| {
        let store = store.clone();
        let offset = if n % 2 == 0 { n } else { 100 - n };
        tokio::spawn(async move {
            let seen = base + Duration::seconds(offset);
            store.record_heartbeat("web-1", seen, seen).await.unwrap()
        })
    });
    for result in join_all(tasks).await {
        result.unwrap();
    }

    let record = store.get_server("web-1").await.unwrap().unwrap();
    assert_eq!(record.last_seen, Some(base + Duration::seconds(99)));
    assert_eq!(record.status, ServerStatus::On);

    // Exactly one UNDEFINED → ON transition, whatever the arrival order
    let transitions = store
        .transitions_between(base - Duration::days(1), base + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(transitions.len(), 1);
}

#[tokio::test]
async fn test_heartbeat_between_read_and_demotion_wins() {
    let store = Arc::new(MemoryStore::new());
    store.register_server(registration("web-1", 10)).await.unwrap();
    let now = base_time();
    let seen = now - Duration::seconds(60);
    store.record_heartbeat("web-1", seen, seen).await.unwrap();

    // The worker read a stale record...
    let record = store.get_server("web-1").await.unwrap().unwrap();
    assert!(record.is_stale(now, 2.0));

    // ...then a fresh heartbeat arrived before it asked for the demotion
    store.record_heartbeat("web-1", now, now).await.unwrap();

    let seen_before = now - record.liveness_window(2.0);
    let demoted = store.demote_if_stale("web-1", seen_before, now).await.unwrap();
    assert!(!demoted);
    assert_eq!(
        store.get_server("web-1").await.unwrap().unwrap().status,
        ServerStatus::On
    );
}

#[tokio::test(start_paused = true)]
async fn test_passes_never_overlap() {
    let store = Arc::new(FailingStore::default());
    store.register_server(registration("web-1", 10)).await.unwrap();
    store.list_delay_ms.store(200, Ordering::SeqCst);

    let worker = MonitoringWorker::new(store.clone(), MonitoringConfig::default(), Clock::new());
    let now = base_time();

    let (first, second) = tokio::join!(worker.run_pass_at(now), worker.run_pass_at(now));

    let outcomes = [first, second];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, PassOutcome::Completed(_)))
            .count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == PassOutcome::Skipped)
            .count(),
        1
    );
    assert_eq!(worker.stats().passes, 1);
    assert_eq!(worker.stats().skipped, 1);

    // The guard is released once the pass is done
    assert_matches!(worker.run_pass_at(now).await, PassOutcome::Completed(_));
}

#[tokio::test(start_paused = true)]
async fn test_check_now_during_pass_is_skipped() {
    let store = Arc::new(FailingStore::default());
    store.list_delay_ms.store(1_000, Ordering::SeqCst);

    let worker = Arc::new(MonitoringWorker::new(
        store.clone(),
        MonitoringConfig::default(),
        Clock::new(),
    ));
    worker.start().unwrap();

    let in_flight = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.check_now().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert_eq!(worker.check_now().await.unwrap(), PassOutcome::Skipped);
    assert_matches!(in_flight.await.unwrap(), Ok(PassOutcome::Completed(_)));

    worker.stop().await.unwrap();
    assert!(!worker.is_running());
}
