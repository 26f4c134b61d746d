//! Built-in pipeline shapes and the prompt library they draw from.

use std::collections::HashMap;
use tracing::info;

use super::schema::SchemaSpec;
use super::{PhaseSpec, PipelineConfig};

pub const LONG_FORM: &str = "long_form";
pub const SHORT_FORM: &str = "short_form";
pub const DEFAULT_OUTPUT_KEY: &str = "post";

/// Prompt texts addressed by id. Config may override any entry.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    prompts: HashMap<String, String>,
}

impl PromptLibrary {
    pub fn builtin() -> Self {
        let entries: &[(&str, &str)] = &[
            (
                "pipeline.long_form",
                "You are producing a long-form piece of writing for publication. \
                 Work only on the current phase and follow its output format exactly.",
            ),
            (
                "pipeline.short_form",
                "You are producing a short social post. \
                 Work only on the current phase and follow its output format exactly.",
            ),
            (
                "research.default",
                "Research the request. Use external search to gather current facts, figures and \
                 sources. Return concise notes with a source for each claim.",
            ),
            (
                "structure.default",
                "Using only the research notes below, design the piece. \
                 Return JSON with a \"title\" and an \"outline\" array of section headings with one-line intents.",
            ),
            (
                "content.default",
                "Write the full piece following the outline below section by section. \
                 Return JSON with \"title\" and \"body\" (markdown).",
            ),
            (
                "optimize.default",
                "Edit the draft below for clarity, hook strength and scannability without changing its claims. \
                 Return JSON with \"post\" (final markdown) and \"changes\" (short list).",
            ),
            (
                "generate.short",
                "Write one post from the research notes below. Keep it under 280 characters unless the \
                 platform allows more. Return JSON with \"post\" and optional \"hashtags\".",
            ),
        ];
        Self {
            prompts: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Self {
        for (id, text) in overrides {
            info!("Prompt override: {}", id);
            self.prompts.insert(id.clone(), text.clone());
        }
        self
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.prompts.get(id).map(String::as_str)
    }
}

fn phase(
    name: &str,
    prompt_source: &str,
    schema: Option<SchemaSpec>,
    allow_external_search: bool,
    input_from: Option<&str>,
) -> PhaseSpec {
    PhaseSpec {
        name: name.to_string(),
        prompt_source: prompt_source.to_string(),
        schema,
        allow_external_search,
        input_from: input_from.map(str::to_string),
    }
}

// --- Pipeline: long form ---

pub fn long_form() -> PipelineConfig {
    PipelineConfig {
        name: LONG_FORM.to_string(),
        prompt_source: "pipeline.long_form".to_string(),
        output_key: DEFAULT_OUTPUT_KEY.to_string(),
        phases: vec![
            phase("research", "research.default", None, true, None),
            phase(
                "structure",
                "structure.default",
                Some(SchemaSpec::object(&["title", "outline"])),
                false,
                Some("research"),
            ),
            phase(
                "content",
                "content.default",
                Some(SchemaSpec::object(&["title", "body"])),
                false,
                Some("structure"),
            ),
            phase(
                "optimize",
                "optimize.default",
                Some(SchemaSpec::object(&["post"])),
                false,
                Some("content"),
            ),
        ],
    }
}

// --- Pipeline: short form ---

pub fn short_form() -> PipelineConfig {
    PipelineConfig {
        name: SHORT_FORM.to_string(),
        prompt_source: "pipeline.short_form".to_string(),
        output_key: DEFAULT_OUTPUT_KEY.to_string(),
        phases: vec![
            phase("research", "research.default", None, true, None),
            phase(
                "generate",
                "generate.short",
                Some(SchemaSpec::object(&["post"])),
                false,
                Some("research"),
            ),
        ],
    }
}

pub fn builtin_pipelines() -> Vec<PipelineConfig> {
    vec![long_form(), short_form()]
}

/// Map a target platform named by the classifier to a pipeline shape.
pub fn pipeline_for_platform(platform: Option<&str>) -> &'static str {
    let Some(platform) = platform else {
        return LONG_FORM;
    };
    match platform.trim().to_lowercase().as_str() {
        "x" | "twitter" | "threads" | "bluesky" | "mastodon" | "linkedin" | "instagram" => {
            SHORT_FORM
        }
        _ => LONG_FORM,
    }
}
