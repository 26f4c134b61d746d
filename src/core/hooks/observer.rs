use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{HookFuture, PostToolUse, PreToolUse, ToolFailure, ToolHooks};
use crate::core::lessons::{
    INPUT_UNAVAILABLE, LESSON_INPUT_BUDGET, LessonEntry, reflect_on_failure, severity_for_error,
    truncate_field,
};
use crate::core::memory::MemorySystem;
use crate::core::memory::types::NewExecution;

struct OpenCall {
    record_id: String,
    started_at: DateTime<Utc>,
    input: String,
}

/// Turns tool hook events into execution records, and failures into lessons.
/// Persistence errors are logged and never surface to the runtime.
pub struct ExecutionObserver {
    memory: Arc<MemorySystem>,
    session_id: String,
    task_id: Option<String>,
    open: Mutex<HashMap<String, OpenCall>>,
}

impl ExecutionObserver {
    pub fn new(memory: Arc<MemorySystem>, session_id: String, task_id: Option<String>) -> Self {
        Self {
            memory,
            session_id,
            task_id,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wire all three hooks to this observer.
    pub fn hooks(self: &Arc<Self>) -> ToolHooks {
        let pre = self.clone();
        let post = self.clone();
        let failure = self.clone();
        ToolHooks {
            on_pre_tool_use: Some(Arc::new(move |event: PreToolUse| {
                let observer = pre.clone();
                Box::pin(async move { observer.on_pre_tool_use(event).await }) as HookFuture
            })),
            on_post_tool_use: Some(Arc::new(move |event: PostToolUse| {
                let observer = post.clone();
                Box::pin(async move { observer.on_post_tool_use(event).await }) as HookFuture
            })),
            on_tool_failure: Some(Arc::new(move |event: ToolFailure| {
                let observer = failure.clone();
                Box::pin(async move { observer.on_tool_failure(event).await }) as HookFuture
            })),
        }
    }

    pub async fn on_pre_tool_use(&self, event: PreToolUse) {
        let input = event.input.to_string();
        let started_at = stored_timestamp(event.at);
        let opened = self
            .memory
            .open_execution(&NewExecution {
                session_id: &self.session_id,
                task_id: self.task_id.as_deref(),
                tool_call_id: &event.tool_call_id,
                tool_name: &event.tool_name,
                input: &input,
                started_at: &started_at,
            })
            .await;

        match opened {
            Ok(record_id) => {
                self.open.lock().await.insert(
                    event.tool_call_id,
                    OpenCall {
                        record_id,
                        started_at: event.at,
                        input: truncate_field(&input, LESSON_INPUT_BUDGET),
                    },
                );
            }
            Err(e) => warn!(
                "[session:{}] Failed to open execution record for {}: {}",
                self.session_id, event.tool_name, e
            ),
        }
    }

    pub async fn on_post_tool_use(&self, event: PostToolUse) {
        let Some(call) = self.open.lock().await.remove(&event.tool_call_id) else {
            debug!(
                "[session:{}] post_tool_use for unknown call {} ({}), skipping",
                self.session_id, event.tool_call_id, event.tool_name
            );
            return;
        };
        let duration_ms = elapsed_ms(call.started_at, event.at);
        if let Err(e) = self
            .memory
            .close_execution(
                &call.record_id,
                "success",
                Some(&event.result),
                None,
                duration_ms,
            )
            .await
        {
            warn!(
                "[session:{}] Failed to close execution record {}: {}",
                self.session_id, call.record_id, e
            );
        }
    }

    pub async fn on_tool_failure(&self, event: ToolFailure) {
        let open_call = self.open.lock().await.remove(&event.tool_call_id);
        let input = match open_call {
            Some(call) => {
                let duration_ms = elapsed_ms(call.started_at, event.at);
                if let Err(e) = self
                    .memory
                    .close_execution(
                        &call.record_id,
                        "error",
                        None,
                        Some(&event.error),
                        duration_ms,
                    )
                    .await
                {
                    warn!(
                        "[session:{}] Failed to close execution record {}: {}",
                        self.session_id, call.record_id, e
                    );
                }
                call.input
            }
            None => {
                debug!(
                    "[session:{}] tool_failure for unknown call {} ({}), no record to close",
                    self.session_id, event.tool_call_id, event.tool_name
                );
                INPUT_UNAVAILABLE.to_string()
            }
        };

        let lesson = LessonEntry {
            id: uuid::Uuid::new_v4().to_string(),
            tool_name: event.tool_name.clone(),
            error_pattern: event.error.clone(),
            reflection: reflect_on_failure(&event.tool_name, &input, &event.error),
            resolution: None,
            severity: severity_for_error(&event.error),
            created_at: stored_timestamp(event.at),
        };
        if let Err(e) = self.memory.append_lesson(&lesson).await {
            warn!(
                "[session:{}] Failed to record lesson for {}: {}",
                self.session_id, event.tool_name, e
            );
        }
    }
}

/// Same fixed-width shape as `memory::now_rfc3339`.
fn stored_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds().max(0)
}
