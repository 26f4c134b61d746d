use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use super::super::AppState;
use crate::core::scheduler::RunNow;

pub async fn get_schedules(State(state): State<AppState>) -> Json<serde_json::Value> {
    let last_runs = state
        .dispatcher
        .memory()
        .last_schedule_runs()
        .await
        .unwrap_or_default();

    let schedules: Vec<serde_json::Value> = state
        .scheduler
        .jobs()
        .into_iter()
        .map(|job| {
            let last_run = last_runs.iter().find(|run| run.job_name == job.name);
            serde_json::json!({
                "name": job.name,
                "cron": job.cron,
                "running": job.running,
                "last_run": last_run,
            })
        })
        .collect();

    Json(serde_json::json!({
        "success": true,
        "schedules": schedules
    }))
}

/// Kick a schedule immediately. Responds before the job finishes.
pub async fn run_schedule_now(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let result = state.scheduler.run_now(&name);
    let status = match result {
        RunNow::Accepted => StatusCode::ACCEPTED,
        RunNow::Busy => StatusCode::CONFLICT,
        RunNow::UnknownJob => StatusCode::NOT_FOUND,
    };
    (
        status,
        Json(serde_json::json!({
            "success": result == RunNow::Accepted,
            "job": name,
            "result": result
        })),
    )
}
