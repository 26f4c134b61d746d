mod http;
#[cfg(test)]
pub mod mock;

pub use http::HttpAgentRuntime;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::hooks::{PostToolUse, PreToolUse, ToolFailure, ToolHooks};

/// Per-invocation switches passed to the agent runtime.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct InvokeOptions {
    pub tools_allowed: bool,
    pub external_search_allowed: bool,
    pub model: Option<String>,
    pub session_id: Option<String>,
}

impl InvokeOptions {
    /// Pure text generation: no tools, no search.
    pub fn text_only(model: Option<String>) -> Self {
        Self {
            tools_allowed: false,
            external_search_allowed: false,
            model,
            session_id: None,
        }
    }
}

/// One tool invocation as reported by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub cost: f64,
    pub session_id: Option<String>,
}

/// The opaque agent invocation capability. Implementations must call the
/// supplied hooks around every tool call they perform.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn invoke(
        &self,
        prompt: &str,
        options: &InvokeOptions,
        hooks: &ToolHooks,
    ) -> Result<AgentOutput>;
}

/// Fire hooks for tool calls the runtime reports after the fact, in order.
pub async fn replay_tool_calls(calls: &[ToolCall], hooks: &ToolHooks) {
    for call in calls {
        let started = call.started_at.unwrap_or_else(Utc::now);
        let finished = call.finished_at.unwrap_or(started);
        hooks
            .pre_tool_use(PreToolUse {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                input: call.input.clone(),
                at: started,
            })
            .await;
        match &call.error {
            Some(error) => {
                hooks
                    .tool_failure(ToolFailure {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        error: error.clone(),
                        at: finished,
                    })
                    .await
            }
            None => {
                hooks
                    .post_tool_use(PostToolUse {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        result: call.output.clone().unwrap_or_default(),
                        at: finished,
                    })
                    .await
            }
        }
    }
}
