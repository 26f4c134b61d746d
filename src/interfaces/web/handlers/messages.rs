use axum::{Json, extract::State, http::StatusCode};

use super::super::AppState;

#[derive(serde::Deserialize)]
pub struct InboundMessage {
    thread_id: String,
    text: String,
}

/// Feed a message into the dispatcher as if it arrived on `thread_id`.
/// Returns once the message is classified and routed; work runs in the
/// background and reports back through the messaging surface.
pub async fn post_message(
    State(state): State<AppState>,
    Json(payload): Json<InboundMessage>,
) -> (StatusCode, Json<serde_json::Value>) {
    let thread_id = payload.thread_id.trim();
    let text = payload.text.trim();
    if thread_id.is_empty() || text.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "error": "thread_id and text are required"
            })),
        );
    }

    match state.dispatcher.handle_inbound(thread_id, text).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "result": outcome })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "success": false, "error": e.to_string() })),
        ),
    }
}
