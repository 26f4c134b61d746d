use axum::{
    Json,
    extract::{Query, State},
};

use super::super::AppState;
use super::limit_or;

#[derive(serde::Deserialize)]
pub struct LessonsQuery {
    limit: Option<usize>,
}

pub async fn list_lessons(
    State(state): State<AppState>,
    Query(query): Query<LessonsQuery>,
) -> Json<serde_json::Value> {
    match state
        .dispatcher
        .memory()
        .recent_lessons(limit_or(query.limit, 20))
        .await
    {
        Ok(lessons) => Json(serde_json::json!({ "success": true, "lessons": lessons })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}
