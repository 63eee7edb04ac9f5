//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - Read endpoints reflect the status store
//! - Event ingestion goes through the bus and ends up in the store
//! - Invalid bodies and unknown servers map to 400 and 404
//! - Scheduler introspection lists the configured tasks

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::{Value, json};
use server_liveness::{
    ServerStatus,
    api::{ApiConfig, ApiState, ServerStatusResponse, spawn_api_server},
    clock::Clock,
    pipeline::Pipeline,
    storage::MemoryStore,
};

use crate::helpers::*;

async fn spawn_test_api() -> (Pipeline, Arc<MemoryStore>, SocketAddr) {
    let store = Arc::new(MemoryStore::new());
    let config = test_config(vec![server("web-1", 10), server("web-2", 10)]);
    let pipeline = Pipeline::with_store(config, store.clone(), Clock::new()).unwrap();
    pipeline.start().await.unwrap();

    let api_config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
        enable_cors: true,
    };
    let addr = spawn_api_server(
        api_config,
        ApiState::from_pipeline(&pipeline),
        pipeline.shutdown_token(),
    )
    .await
    .unwrap();

    (pipeline, store, addr)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (pipeline, _store, addr) = spawn_test_api().await;

    let response = reqwest::get(format!("http://{addr}/api/v1/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK.as_u16());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["uptime_seconds"].as_i64().unwrap() >= 0);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_list_servers_and_status() {
    let (pipeline, _store, addr) = spawn_test_api().await;

    let body: Value = reqwest::get(format!("http://{addr}/api/v1/servers"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 2);
    assert_eq!(body["servers"][0]["server_id"], "web-1");
    assert_eq!(body["servers"][0]["status"], "UNDEFINED");

    let response = reqwest::get(format!("http://{addr}/api/v1/servers/web-2/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK.as_u16());
    let status: ServerStatusResponse = response.json().await.unwrap();
    assert_eq!(status.server_id, "web-2");
    assert_eq!(status.status, ServerStatus::Undefined);
    assert_eq!(status.last_seen, None);

    let response = reqwest::get(format!("http://{addr}/api/v1/servers/nope/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND.as_u16());

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ingest_event_turns_server_on() {
    let (pipeline, store, addr) = spawn_test_api().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/api/v1/events"))
        .json(&json!({
            "server_id": "web-1",
            "timestamp": chrono::Utc::now(),
            "cpu": 23.5,
            "ram": 61.0,
            "disk": 40.0
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED.as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["accepted"], true);

    assert!(wait_for_status(store.as_ref(), "web-1", ServerStatus::On).await);

    let status: ServerStatusResponse =
        reqwest::get(format!("http://{addr}/api/v1/servers/web-1/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(status.status, ServerStatus::On);
    assert!(status.last_seen.is_some());

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ingest_rejects_bad_bodies() {
    let (pipeline, _store, addr) = spawn_test_api().await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/v1/events");

    // Not an event at all
    let response = client
        .post(&url)
        .header("content-type", "application/json")
        .body("{ nope")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST.as_u16());

    // Well-formed JSON, empty server id
    let response = client
        .post(&url)
        .json(&json!({"server_id": "", "timestamp": chrono::Utc::now()}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST.as_u16());
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("server_id"));

    // Negative metric
    let response = client
        .post(&url)
        .json(&json!({"server_id": "web-1", "timestamp": chrono::Utc::now(), "cpu": -3.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST.as_u16());

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scheduler_endpoints() {
    let (pipeline, _store, addr) = spawn_test_api().await;

    let tasks: Value = reqwest::get(format!("http://{addr}/api/v1/scheduler/tasks"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tasks["count"], 2);
    let names: Vec<&str> = tasks["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"interval-check-status"));
    assert!(names.contains(&"daily-report"));

    let status: Value = reqwest::get(format!("http://{addr}/api/v1/scheduler/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["running"], true);
    assert_eq!(status["total_tasks"], 2);

    pipeline.shutdown().await.unwrap();
}
