use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::{AgentOutput, AgentRuntime, InvokeOptions, ToolCall, replay_tool_calls};
use crate::core::hooks::ToolHooks;

#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    WithTools(String, Vec<ToolCall>),
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub options: InvokeOptions,
}

/// Scripted runtime for tests. Replies are chosen by the first matching
/// prompt rule, then the FIFO script, then the default text.
pub struct MockRuntime {
    rules: Mutex<Vec<(String, MockReply)>>,
    script: Mutex<VecDeque<MockReply>>,
    default_text: String,
    calls: Mutex<Vec<RecordedCall>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    session_id: Option<String>,
}

impl MockRuntime {
    pub fn new(default_text: &str) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            default_text: default_text.to_string(),
            calls: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn push(&self, reply: MockReply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn when(&self, prompt_contains: &str, reply: MockReply) {
        self.rules
            .lock()
            .unwrap()
            .push((prompt_contains.to_string(), reply));
    }

    /// Invocations whose prompt contains `prompt_contains` block until the
    /// returned handle is notified.
    pub fn gate(&self, prompt_contains: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(prompt_contains.to_string(), notify.clone());
        notify
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn pick_reply(&self, prompt: &str) -> MockReply {
        if let Some((_, reply)) = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
        {
            return reply.clone();
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockReply::Text(self.default_text.clone()))
    }
}

#[async_trait]
impl AgentRuntime for MockRuntime {
    async fn invoke(
        &self,
        prompt: &str,
        options: &InvokeOptions,
        hooks: &ToolHooks,
    ) -> Result<AgentOutput> {
        self.calls.lock().unwrap().push(RecordedCall {
            prompt: prompt.to_string(),
            options: options.clone(),
        });

        let gate = self
            .gates
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, n)| n.clone());
        if let Some(gate) = gate {
            gate.notified().await;
        }

        match self.pick_reply(prompt) {
            MockReply::Text(text) => Ok(AgentOutput {
                text,
                session_id: self.session_id.clone(),
                ..AgentOutput::default()
            }),
            MockReply::WithTools(text, tool_calls) => {
                replay_tool_calls(&tool_calls, hooks).await;
                Ok(AgentOutput {
                    text,
                    tool_calls,
                    cost: 0.0,
                    session_id: self.session_id.clone(),
                })
            }
            MockReply::Fail(message) => Err(anyhow!(message)),
        }
    }
}

pub fn failing_tool_call(id: &str, name: &str, error: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        input: serde_json::json!({}),
        output: None,
        error: Some(error.to_string()),
        started_at: None,
        finished_at: None,
    }
}
