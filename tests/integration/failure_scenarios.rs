//! Failure tests for the liveness pipeline
//!
//! These tests verify that:
//! - A store outage fails individual messages, never the consumer loop
//! - Malformed and unknown-server messages are dropped
//! - A worker pass survives list and per-record failures, and one
//!   failed record never holds back the others
//! - Publishing onto a closed or full bus is reported to the caller

use std::sync::Arc;
use std::sync::atomic::Ordering;

use assert_matches::assert_matches;
use chrono::Duration;
use server_liveness::{
    MonitoringEvent, ServerStatus,
    actors::{ConsumerStats, MonitoringWorker, PassOutcome},
    bus::{BusError, EventBus, MemoryBus, MessageType, MonitoringEventProducer},
    clock::Clock,
    config::MonitoringConfig,
    pipeline::Pipeline,
    storage::StatusStore,
};

use crate::helpers::*;

fn status_queue_stats(pipeline: &Pipeline) -> ConsumerStats {
    let queue = pipeline.config().bus.status_queue.clone();
    pipeline
        .consumer_stats()
        .into_iter()
        .find(|(name, _)| *name == queue)
        .map(|(_, stats)| stats)
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_does_not_stop_consumer() {
    let store = Arc::new(FailingStore::default());
    let clock = Clock::starting_at(base_time());
    let pipeline =
        Pipeline::with_store(test_config(vec![server("web-1", 10)]), store.clone(), clock).unwrap();
    pipeline.start().await.unwrap();
    let producer = pipeline.producer();

    store.fail_heartbeats.store(true, Ordering::SeqCst);
    producer
        .publish(&MonitoringEvent::heartbeat("web-1", clock.now()))
        .await
        .unwrap();
    assert!(wait_until(|| status_queue_stats(&pipeline).failed == 1).await);
    assert_eq!(
        pipeline.get_server_status("web-1").await.unwrap(),
        Some(ServerStatus::Undefined)
    );

    store.fail_heartbeats.store(false, Ordering::SeqCst);
    producer
        .publish(&MonitoringEvent::heartbeat("web-1", clock.now()))
        .await
        .unwrap();
    assert!(wait_for_status(store.as_ref(), "web-1", ServerStatus::On).await);
    assert_eq!(status_queue_stats(&pipeline).processed, 1);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bad_messages_are_dropped() {
    let store = Arc::new(FailingStore::default());
    let clock = Clock::starting_at(base_time());
    let pipeline =
        Pipeline::with_store(test_config(vec![server("web-1", 10)]), store.clone(), clock).unwrap();
    pipeline.start().await.unwrap();
    let status_queue = pipeline.config().bus.status_queue.clone();

    // Garbage bytes and a message type this queue has no handler for
    let bus = pipeline.bus();
    bus.publish(&status_queue, MessageType::Heartbeat, b"{ not json".to_vec())
        .await
        .unwrap();
    bus.publish(&status_queue, MessageType::Metrics, b"{}".to_vec())
        .await
        .unwrap();

    // A well-formed heartbeat for a server nobody registered
    pipeline
        .producer()
        .publish(&MonitoringEvent::heartbeat("ghost", clock.now()))
        .await
        .unwrap();

    pipeline
        .producer()
        .publish(&MonitoringEvent::heartbeat("web-1", clock.now()))
        .await
        .unwrap();

    assert!(wait_for_status(store.as_ref(), "web-1", ServerStatus::On).await);
    assert!(
        wait_until(|| {
            let stats = status_queue_stats(&pipeline);
            stats.processed + stats.failed + stats.dropped == 4
        })
        .await
    );

    let stats = status_queue_stats(&pipeline);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.failed, 1);
    assert!(store.get_server("ghost").await.unwrap().is_none());

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_worker_survives_list_failure() {
    let store = Arc::new(FailingStore::default());
    store.register_server(registration("web-1", 10)).await.unwrap();
    let now = base_time();
    let seen = now - Duration::seconds(60);
    store.record_heartbeat("web-1", seen, seen).await.unwrap();

    let worker = MonitoringWorker::new(store.clone(), MonitoringConfig::default(), Clock::new());

    store.fail_list.store(true, Ordering::SeqCst);
    let report = assert_matches!(worker.run_pass_at(now).await, PassOutcome::Completed(r) => r);
    assert_eq!(report.scanned, 0);
    assert!(report.list_error.unwrap().contains("connection refused"));

    store.fail_list.store(false, Ordering::SeqCst);
    let report = assert_matches!(worker.run_pass_at(now).await, PassOutcome::Completed(r) => r);
    assert_eq!(report.list_error, None);
    assert_eq!(report.demoted, 1);
}

#[tokio::test]
async fn test_failed_demotion_is_retried_next_pass() {
    let store = Arc::new(FailingStore::default());
    let now = base_time();
    for id in ["a", "b"] {
        store.register_server(registration(id, 10)).await.unwrap();
        let seen = now - Duration::seconds(45);
        store.record_heartbeat(id, seen, seen).await.unwrap();
    }

    let worker = MonitoringWorker::new(store.clone(), MonitoringConfig::default(), Clock::new());

    store.fail_demote.store(true, Ordering::SeqCst);
    let report = assert_matches!(worker.run_pass_at(now).await, PassOutcome::Completed(r) => r);
    assert_eq!(report.scanned, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.demoted, 0);

    store.fail_demote.store(false, Ordering::SeqCst);
    let report = assert_matches!(worker.run_pass_at(now).await, PassOutcome::Completed(r) => r);
    assert_eq!(report.demoted, 2);
    assert_eq!(worker.stats().failed, 2);
    assert_eq!(worker.stats().demoted, 2);
}

#[tokio::test]
async fn test_one_failed_demotion_does_not_block_others() {
    let store = Arc::new(FailingStore::default());
    let now = base_time();
    for id in ["a", "b"] {
        store.register_server(registration(id, 10)).await.unwrap();
        let seen = now - Duration::seconds(45);
        store.record_heartbeat(id, seen, seen).await.unwrap();
    }
    store.fail_demote_for.lock().insert("a".to_string());

    let worker = MonitoringWorker::new(store.clone(), MonitoringConfig::default(), Clock::new());

    let report = assert_matches!(worker.run_pass_at(now).await, PassOutcome::Completed(r) => r);
    assert_eq!(report.scanned, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.demoted, 1);

    let a = store.get_server("a").await.unwrap().unwrap();
    let b = store.get_server("b").await.unwrap().unwrap();
    assert_eq!(a.status, ServerStatus::On);
    assert_eq!(b.status, ServerStatus::Off);
    assert_eq!(b.status_changed_at, Some(now));
}

#[tokio::test]
async fn test_publish_errors_reach_the_caller() {
    let bus = MemoryBus::new(1);
    let producer = MonitoringEventProducer::new(Arc::new(bus.clone()), "status", "metrics");
    let now = base_time();

    let invalid = MonitoringEvent::heartbeat("  ", now);
    assert_matches!(producer.publish(&invalid).await, Err(BusError::InvalidEvent(_)));

    let negative = MonitoringEvent::heartbeat("web-1", now).with_metrics(-1.0, 0.0, 0.0);
    assert_matches!(producer.publish(&negative).await, Err(BusError::InvalidEvent(_)));

    producer
        .publish(&MonitoringEvent::heartbeat("web-1", now))
        .await
        .unwrap();
    assert_matches!(
        producer.publish(&MonitoringEvent::heartbeat("web-1", now)).await,
        Err(BusError::QueueFull { capacity: 1, .. })
    );

    bus.close();
    assert_matches!(
        producer.publish(&MonitoringEvent::heartbeat("web-1", now)).await,
        Err(BusError::Closed)
    );
}
