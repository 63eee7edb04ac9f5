//! Scheduler introspection endpoints

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::state::ApiState;
use crate::scheduler::SchedulerStatus;

/// GET /api/v1/scheduler/tasks
pub async fn list_tasks(State(state): State<ApiState>) -> Json<Value> {
    let tasks = state.scheduler.list_tasks();

    Json(json!({
        "count": tasks.len(),
        "tasks": tasks,
    }))
}

/// GET /api/v1/scheduler/status
pub async fn scheduler_status(State(state): State<ApiState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}
