use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use super::super::AppState;
use super::limit_or;

#[derive(serde::Deserialize)]
pub struct ListQuery {
    limit: Option<usize>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<serde_json::Value> {
    let queue = state.dispatcher.queue();
    let history = match state
        .dispatcher
        .memory()
        .list_tasks(limit_or(query.limit, 50))
        .await
    {
        Ok(rows) => rows,
        Err(e) => {
            return Json(serde_json::json!({ "success": false, "error": e.to_string() }));
        }
    };

    Json(serde_json::json!({
        "success": true,
        "queue": {
            "max_concurrent": queue.max_concurrent(),
            "running": queue.running_count(),
            "queued": queue.queued_count(),
            "tasks": queue.snapshot(),
        },
        "tasks": history
    }))
}

pub async fn get_task(
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.dispatcher.memory().get_task(&task_id).await {
        Ok(Some(task)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "task": task })),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "success": false, "error": "Task not found" })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "success": false, "error": e.to_string() })),
        ),
    }
}

pub async fn get_task_artifacts(
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state
        .dispatcher
        .memory()
        .list_phase_artifacts(&task_id)
        .await
    {
        Ok(artifacts) => Json(serde_json::json!({ "success": true, "artifacts": artifacts })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn get_task_executions(
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state
        .dispatcher
        .memory()
        .list_executions_for_task(&task_id)
        .await
    {
        Ok(records) => Json(serde_json::json!({ "success": true, "executions": records })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}
