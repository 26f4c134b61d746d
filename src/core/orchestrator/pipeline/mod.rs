pub mod defaults;
pub mod schema;

pub use defaults::PromptLibrary;
pub use schema::SchemaSpec;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::core::hooks::ToolHooks;
use crate::core::runtime::{AgentRuntime, InvokeOptions};
use schema::{parse_json_loose, parse_with_repair};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: String,
    pub prompt_source: String,
    #[serde(default)]
    pub schema: Option<SchemaSpec>,
    #[serde(default)]
    pub allow_external_search: bool,
    #[serde(default)]
    pub input_from: Option<String>,
}

/// An ordered, immutable phase list run by [`PipelineRunner`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub prompt_source: String,
    pub output_key: String,
    pub phases: Vec<PhaseSpec>,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |reason: String| PipelineError::InvalidConfig {
            pipeline: self.name.clone(),
            reason,
        };

        if self.phases.is_empty() {
            return Err(invalid("no phases".to_string()));
        }
        if self.output_key.trim().is_empty() {
            return Err(invalid("empty output_key".to_string()));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (idx, phase) in self.phases.iter().enumerate() {
            if !seen.insert(phase.name.as_str()) {
                return Err(invalid(format!("duplicate phase name '{}'", phase.name)));
            }
            if idx > 0 && phase.allow_external_search {
                return Err(invalid(format!(
                    "phase '{}' enables external search; only the first phase may",
                    phase.name
                )));
            }
            if let Some(dep) = &phase.input_from {
                if idx == 0 {
                    return Err(invalid(format!(
                        "first phase '{}' cannot depend on '{}'",
                        phase.name, dep
                    )));
                }
                // `seen` already holds this phase, so exclude self-references explicitly.
                if dep == &phase.name || !seen.contains(dep.as_str()) {
                    return Err(invalid(format!(
                        "phase '{}' depends on '{}', which is not an earlier phase",
                        phase.name, dep
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid pipeline '{pipeline}': {reason}")]
    InvalidConfig { pipeline: String, reason: String },
    #[error("phase '{phase}' failed: {source}")]
    Invocation {
        phase: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("phase '{phase}' output failed validation: {reason}")]
    Validation { phase: String, reason: String },
    #[error("phase '{phase}' already has an artifact")]
    DuplicateArtifact { phase: String },
    #[error("checkpoint for phase '{phase}' failed: {source}")]
    Checkpoint {
        phase: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Name of the phase the run aborted in, if the failure belongs to one.
    pub fn phase(&self) -> Option<&str> {
        match self {
            PipelineError::InvalidConfig { .. } => None,
            PipelineError::Invocation { phase, .. }
            | PipelineError::Validation { phase, .. }
            | PipelineError::DuplicateArtifact { phase }
            | PipelineError::Checkpoint { phase, .. } => Some(phase),
        }
    }
}

/// Raw phase outputs in execution order. Each phase may be written once.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseArtifacts {
    entries: Vec<(String, String)>,
}

impl PhaseArtifacts {
    pub fn insert(&mut self, phase: &str, content: String) -> Result<(), PipelineError> {
        if self.get(phase).is_some() {
            return Err(PipelineError::DuplicateArtifact {
                phase: phase.to_string(),
            });
        }
        self.entries.push((phase.to_string(), content));
        Ok(())
    }

    pub fn get(&self, phase: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == phase)
            .map(|(_, content)| content.as_str())
    }

    pub fn last(&self) -> Option<(&str, &str)> {
        self.entries
            .last()
            .map(|(name, content)| (name.as_str(), content.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, c)| (n.as_str(), c.as_str()))
    }
}

/// Receives each artifact as soon as its phase succeeds.
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn checkpoint(&self, phase_index: usize, phase: &str, content: &str)
    -> anyhow::Result<()>;
}

/// Sink that keeps nothing.
pub struct NoCheckpoint;

#[async_trait]
impl CheckpointSink for NoCheckpoint {
    async fn checkpoint(&self, _: usize, _: &str, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub output_key: String,
    pub value: Value,
    pub artifacts: PhaseArtifacts,
    pub cost: f64,
    /// Last session id any phase reported back.
    pub session_id: Option<String>,
}

impl PipelineOutput {
    /// `{output_key: value}`.
    pub fn keyed(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(self.output_key.clone(), self.value.clone());
        Value::Object(map)
    }

    /// The final value as message text: strings verbatim, anything else as pretty JSON.
    pub fn text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

/// Pick the final value from the last artifact: the `output_key` field of a
/// JSON object when present, otherwise the whole artifact.
pub fn select_output(raw: &str, output_key: &str) -> Value {
    match parse_json_loose(raw) {
        Some(Value::Object(mut map)) => match map.remove(output_key) {
            Some(value) => value,
            None => Value::Object(map),
        },
        Some(other) => other,
        None => Value::String(raw.trim().to_string()),
    }
}

/// Assemble the prompt for phase `index`.
pub fn build_phase_prompt(
    config: &PipelineConfig,
    index: usize,
    prompts: &PromptLibrary,
    lessons_preamble: &str,
    seed_prompt: &str,
    category: Option<&str>,
    artifacts: &PhaseArtifacts,
) -> Result<String, PipelineError> {
    let phase = &config.phases[index];
    let missing_prompt = |id: &str| PipelineError::InvalidConfig {
        pipeline: config.name.clone(),
        reason: format!("unknown prompt source '{}'", id),
    };
    let pipeline_text = prompts
        .get(&config.prompt_source)
        .ok_or_else(|| missing_prompt(&config.prompt_source))?;
    let phase_text = prompts
        .get(&phase.prompt_source)
        .ok_or_else(|| missing_prompt(&phase.prompt_source))?;

    let mut parts = Vec::new();
    parts.push(format!("{}\n", pipeline_text));
    if !lessons_preamble.is_empty() {
        parts.push(lessons_preamble.to_string());
    }
    parts.push(format!(
        "## Phase {}/{}: {}\n{}\n",
        index + 1,
        config.phases.len(),
        phase.name,
        phase_text
    ));

    if index == 0 {
        parts.push(format!("## Request\n{}\n", seed_prompt));
        if let Some(category) = category {
            parts.push(format!("## Category\n{}\n", category));
        }
    }

    if let Some(dep) = &phase.input_from {
        let input = artifacts.get(dep).ok_or_else(|| PipelineError::InvalidConfig {
            pipeline: config.name.clone(),
            reason: format!("phase '{}' input '{}' has no artifact", phase.name, dep),
        })?;
        parts.push(format!("## Input from {}\n{}\n", dep, input));
    }

    if let Some(schema) = &phase.schema {
        let shape = match schema {
            SchemaSpec::Object { required } if !required.is_empty() => {
                format!("a single JSON object with keys: {}", required.join(", "))
            }
            SchemaSpec::Object { .. } => "a single JSON object".to_string(),
            SchemaSpec::Array { .. } => "a single JSON array".to_string(),
        };
        parts.push(format!(
            "## Output format\nRespond with {} and nothing else.\n",
            shape
        ));
    }

    Ok(parts.join("\n"))
}

/// Runs a [`PipelineConfig`] phase by phase. Never retries; the first
/// failing phase aborts the run.
pub struct PipelineRunner<'a> {
    runtime: &'a dyn AgentRuntime,
    prompts: &'a PromptLibrary,
    hooks: ToolHooks,
    lessons_preamble: String,
    model: Option<String>,
    session_id: Option<String>,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(runtime: &'a dyn AgentRuntime, prompts: &'a PromptLibrary) -> Self {
        Self {
            runtime,
            prompts,
            hooks: ToolHooks::default(),
            lessons_preamble: String::new(),
            model: None,
            session_id: None,
        }
    }

    pub fn with_hooks(mut self, hooks: ToolHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_lessons(mut self, preamble: String) -> Self {
        self.lessons_preamble = preamble;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub async fn run(
        &self,
        config: &PipelineConfig,
        seed_prompt: &str,
        category: Option<&str>,
        checkpoint: &dyn CheckpointSink,
    ) -> Result<PipelineOutput, PipelineError> {
        config.validate()?;
        let mut artifacts = PhaseArtifacts::default();
        let mut cost = 0.0;
        let mut session_id = None;

        for (index, phase) in config.phases.iter().enumerate() {
            let prompt = build_phase_prompt(
                config,
                index,
                self.prompts,
                &self.lessons_preamble,
                seed_prompt,
                category,
                &artifacts,
            )?;
            let options = InvokeOptions {
                tools_allowed: true,
                external_search_allowed: phase.allow_external_search,
                model: self.model.clone(),
                session_id: self.session_id.clone(),
            };

            info!(
                "[pipeline:{}] phase {}/{} '{}' starting",
                config.name,
                index + 1,
                config.phases.len(),
                phase.name
            );
            let output = self
                .runtime
                .invoke(&prompt, &options, &self.hooks)
                .await
                .map_err(|source| PipelineError::Invocation {
                    phase: phase.name.clone(),
                    source,
                })?;
            cost += output.cost;
            if output.session_id.is_some() {
                session_id = output.session_id;
            }

            let content = match &phase.schema {
                Some(schema) => {
                    let value = parse_with_repair(&output.text, schema).map_err(|reason| {
                        warn!(
                            "[pipeline:{}] phase '{}' validation failed: {}",
                            config.name, phase.name, reason
                        );
                        PipelineError::Validation {
                            phase: phase.name.clone(),
                            reason,
                        }
                    })?;
                    value.to_string()
                }
                None => output.text,
            };

            artifacts.insert(&phase.name, content.clone())?;
            checkpoint
                .checkpoint(index, &phase.name, &content)
                .await
                .map_err(|source| PipelineError::Checkpoint {
                    phase: phase.name.clone(),
                    source,
                })?;
        }

        let value = artifacts
            .last()
            .map(|(_, raw)| select_output(raw, &config.output_key))
            .unwrap_or(Value::Null);
        info!(
            "[pipeline:{}] completed {} phases",
            config.name,
            artifacts.len()
        );
        Ok(PipelineOutput {
            output_key: config.output_key.clone(),
            value,
            artifacts,
            cost,
            session_id,
        })
    }
}
