use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{AgentOutput, AgentRuntime, InvokeOptions, ToolCall, replay_tool_calls};
use crate::core::hooks::ToolHooks;

#[derive(Serialize)]
struct InvokeRequest<'a> {
    prompt: &'a str,
    tools_allowed: bool,
    external_search_allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct InvokeResponse {
    text: String,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
    #[serde(default)]
    cost: f64,
    #[serde(default)]
    session_id: Option<String>,
}

/// Agent runtime reached over HTTP. The remote side runs the agent loop and
/// reports each tool call it made; those are replayed through the hooks.
pub struct HttpAgentRuntime {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpAgentRuntime {
    pub fn new(endpoint: String, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            endpoint,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn invoke(
        &self,
        prompt: &str,
        options: &InvokeOptions,
        hooks: &ToolHooks,
    ) -> Result<AgentOutput> {
        let req = InvokeRequest {
            prompt,
            tools_allowed: options.tools_allowed,
            external_search_allowed: options.external_search_allowed,
            model: options.model.as_deref(),
            session_id: options.session_id.as_deref(),
        };

        let mut request = self.client.post(&self.endpoint).json(&req);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let res = request.send().await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "Agent runtime error: {}",
                res.text().await.unwrap_or_default()
            ));
        }

        let body: InvokeResponse = res.json().await?;
        debug!(
            "Agent runtime returned {} chars, {} tool calls",
            body.text.len(),
            body.tool_calls.len()
        );
        replay_tool_calls(&body.tool_calls, hooks).await;

        Ok(AgentOutput {
            text: body.text,
            tool_calls: body.tool_calls,
            cost: body.cost,
            session_id: body.session_id,
        })
    }
}
