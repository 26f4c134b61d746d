pub mod lessons;
pub mod messages;
pub mod schedules;
pub mod tasks;

use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub(crate) fn limit_or(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, 500)
}
