//! End-to-end tests: producer → bus → consumers → store ← worker ← scheduler
//!
//! All tests run on a paused tokio clock, so the 10s check task and the 20s
//! liveness window elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use server_liveness::{
    MonitoringEvent, ServerStatus, clock::Clock, pipeline::Pipeline, scheduler::TaskStatus,
    storage::{MemoryStore, StatusStore},
};

use crate::helpers::*;

async fn started_pipeline(servers: &[(&str, u32)]) -> (Pipeline, Arc<MemoryStore>, Clock) {
    let store = Arc::new(MemoryStore::new());
    let clock = Clock::starting_at(base_time());
    let servers = servers.iter().map(|(id, interval)| server(id, *interval)).collect();

    let pipeline = Pipeline::with_store(test_config(servers), store.clone(), clock).unwrap();
    pipeline.start().await.unwrap();

    (pipeline, store, clock)
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_then_silence_goes_off() {
    let (pipeline, store, clock) = started_pipeline(&[("web-1", 10)]).await;

    assert_eq!(
        pipeline.get_server_status("web-1").await.unwrap(),
        Some(ServerStatus::Undefined)
    );

    pipeline
        .producer()
        .publish(&MonitoringEvent::heartbeat("web-1", clock.now()))
        .await
        .unwrap();
    assert!(wait_for_status(store.as_ref(), "web-1", ServerStatus::On).await);

    // No further heartbeats: the check task demotes once 20s have passed
    assert!(wait_for_status(store.as_ref(), "web-1", ServerStatus::Off).await);

    let record = store.get_server("web-1").await.unwrap().unwrap();
    let silence = record.status_changed_at.unwrap() - record.last_seen.unwrap();
    assert!(silence > chrono::Duration::seconds(20));
    assert!(silence <= chrono::Duration::seconds(30));

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_regular_heartbeats_keep_server_on() {
    let (pipeline, store, clock) = started_pipeline(&[("web-1", 10)]).await;
    let producer = pipeline.producer();

    for _ in 0..12 {
        producer
            .publish(&MonitoringEvent::heartbeat("web-1", clock.now()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    }

    let record = store.get_server("web-1").await.unwrap().unwrap();
    assert_eq!(record.status, ServerStatus::On);
    assert_eq!(pipeline.worker().stats().demoted, 0);
    assert!(pipeline.worker().stats().passes >= 10);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_recovery_is_recorded_as_transitions() {
    let (pipeline, store, clock) = started_pipeline(&[("db-1", 5)]).await;
    let producer = pipeline.producer();
    let start = clock.now();

    producer
        .publish(&MonitoringEvent::heartbeat("db-1", clock.now()))
        .await
        .unwrap();
    assert!(wait_for_status(store.as_ref(), "db-1", ServerStatus::On).await);
    assert!(wait_for_status(store.as_ref(), "db-1", ServerStatus::Off).await);

    producer
        .publish(&MonitoringEvent::heartbeat("db-1", clock.now()))
        .await
        .unwrap();
    assert!(wait_for_status(store.as_ref(), "db-1", ServerStatus::On).await);

    let transitions = store
        .transitions_between(start, clock.now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    let path: Vec<_> = transitions.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        path,
        vec![
            (ServerStatus::Undefined, ServerStatus::On),
            (ServerStatus::On, ServerStatus::Off),
            (ServerStatus::Off, ServerStatus::On),
        ]
    );

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_metrics_event_updates_status_and_samples() {
    let (pipeline, store, clock) = started_pipeline(&[("web-1", 10)]).await;

    let event = MonitoringEvent::heartbeat("web-1", clock.now()).with_metrics(12.5, 40.0, 71.25);
    pipeline.producer().publish(&event).await.unwrap();

    assert!(wait_for_status(store.as_ref(), "web-1", ServerStatus::On).await);

    let mut samples = Vec::new();
    for _ in 0..100 {
        samples = store.query_latest_samples("web-1", 10).await.unwrap();
        if !samples.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].cpu, Some(12.5));
    assert_eq!(samples[0].disk, Some(71.25));

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_never_seen_server_stays_undefined() {
    let (pipeline, store, _clock) = started_pipeline(&[("web-1", 10), ("batch-7", 60)]).await;

    tokio::time::sleep(Duration::from_secs(300)).await;

    for id in ["web-1", "batch-7"] {
        let record = store.get_server(id).await.unwrap().unwrap();
        assert_eq!(record.status, ServerStatus::Undefined);
        assert_eq!(record.last_seen, None);
    }

    let report = pipeline.worker().last_report().unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.undefined, 2);
    assert_eq!(report.demoted, 0);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_lists_default_tasks() {
    let (pipeline, _store, _clock) = started_pipeline(&[]).await;

    let status = pipeline.scheduler_status();
    assert!(status.running);
    // No retention task: the in-memory store has no retention period
    assert_eq!(status.total_tasks, 2);

    let mut names: Vec<_> = pipeline.list_tasks().into_iter().map(|t| t.name).collect();
    names.sort();
    assert_eq!(
        names,
        vec!["daily-report", "interval-check-status"]
    );

    tokio::time::sleep(Duration::from_secs(11)).await;
    let check = pipeline
        .scheduler()
        .get_task("interval-check-status")
        .unwrap();
    assert!(check.run_count >= 1);
    assert_eq!(check.failure_count, 0);
    assert_eq!(check.status, TaskStatus::Idle);

    pipeline.shutdown().await.unwrap();
    assert!(!pipeline.scheduler_status().running);
}
