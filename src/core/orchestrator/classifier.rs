use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::pipeline::schema::parse_json_loose;
use super::types::{AutonomyLevel, Classification, Intent};
use crate::core::hooks::ToolHooks;
use crate::core::runtime::{AgentRuntime, InvokeOptions};

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("cannot classify an empty request")]
    EmptyInput,
    #[error("classifier invocation failed: {0}")]
    Invocation(#[source] anyhow::Error),
    #[error("classifier output unusable: {0}")]
    Parse(String),
}

const CLASSIFIER_PROMPT: &str = "You route requests for a personal automation assistant. \
Classify the request below and respond with ONLY a JSON object:\n\
{\"intent\": \"chat|research|automation|content\", \
\"autonomy_level\": \"supervised|assisted|full\", \
\"summary\": \"one sentence restating the task\", \
\"clarify_question\": \"a question if the request is ambiguous, otherwise null\", \
\"platform\": \"target publishing platform for content, otherwise null\"}\n\
Use \"full\" only when the request is unambiguous and safe to run unattended.";

#[derive(Deserialize)]
struct RawClassification {
    intent: String,
    #[serde(alias = "autonomy")]
    autonomy_level: String,
    summary: String,
    #[serde(default)]
    clarify_question: Option<String>,
    #[serde(default)]
    platform: Option<String>,
}

/// One-shot request classifier. Fails closed: any problem is an error, never a guess.
pub struct Classifier {
    runtime: Arc<dyn AgentRuntime>,
    model: Option<String>,
}

impl Classifier {
    pub fn new(runtime: Arc<dyn AgentRuntime>, model: Option<String>) -> Self {
        Self { runtime, model }
    }

    pub async fn classify(&self, text: &str) -> Result<Classification, ClassifyError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClassifyError::EmptyInput);
        }

        let prompt = format!("{}\n\n## Request\n{}", CLASSIFIER_PROMPT, text);
        let options = InvokeOptions::text_only(self.model.clone());
        let output = self
            .runtime
            .invoke(&prompt, &options, &ToolHooks::none())
            .await
            .map_err(ClassifyError::Invocation)?;

        let classification = parse_classification(&output.text)?;
        debug!(
            "Classified as {} ({}): {}",
            classification.intent.as_str(),
            classification.autonomy.as_str(),
            classification.summary
        );
        Ok(classification)
    }
}

pub(crate) fn parse_classification(raw: &str) -> Result<Classification, ClassifyError> {
    let value = parse_json_loose(raw).ok_or_else(|| {
        warn!("Classifier returned no JSON: {}", raw);
        ClassifyError::Parse("no JSON object in output".to_string())
    })?;
    let parsed: RawClassification =
        serde_json::from_value(value).map_err(|e| ClassifyError::Parse(e.to_string()))?;

    let intent = Intent::from_status(&parsed.intent)
        .ok_or_else(|| ClassifyError::Parse(format!("unknown intent '{}'", parsed.intent)))?;
    let autonomy = AutonomyLevel::from_status(&parsed.autonomy_level).ok_or_else(|| {
        ClassifyError::Parse(format!(
            "unknown autonomy level '{}'",
            parsed.autonomy_level
        ))
    })?;
    let summary = parsed.summary.trim().to_string();
    if summary.is_empty() {
        return Err(ClassifyError::Parse("empty summary".to_string()));
    }

    Ok(Classification {
        intent,
        autonomy,
        summary,
        clarify_question: non_blank(parsed.clarify_question),
        platform: non_blank(parsed.platform),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "null")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runtime::mock::{MockReply, MockRuntime};

    #[tokio::test]
    async fn classifies_with_tools_and_search_disabled() {
        let runtime = Arc::new(MockRuntime::new(
            r#"{"intent":"content","autonomy_level":"assisted","summary":"Write a blog post about Rust","clarify_question":null,"platform":"blog"}"#,
        ));
        let classifier = Classifier::new(runtime.clone(), Some("small".into()));

        let c = classifier.classify("write a blog post on rust").await.unwrap();
        assert_eq!(c.intent, Intent::Content);
        assert_eq!(c.autonomy, AutonomyLevel::Assisted);
        assert_eq!(c.platform.as_deref(), Some("blog"));
        assert!(c.clarify_question.is_none());

        let calls = runtime.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].options.tools_allowed);
        assert!(!calls[0].options.external_search_allowed);
        assert_eq!(calls[0].options.model.as_deref(), Some("small"));
        assert!(calls[0].prompt.contains("write a blog post on rust"));
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_invoking() {
        let runtime = Arc::new(MockRuntime::new("{}"));
        let classifier = Classifier::new(runtime.clone(), None);
        assert!(matches!(
            classifier.classify("   ").await,
            Err(ClassifyError::EmptyInput)
        ));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn invocation_failure_fails_closed() {
        let runtime = Arc::new(MockRuntime::new(""));
        runtime.push(MockReply::Fail("connection refused".into()));
        let classifier = Classifier::new(runtime, None);
        assert!(matches!(
            classifier.classify("hello").await,
            Err(ClassifyError::Invocation(_))
        ));
    }

    #[tokio::test]
    async fn prose_output_fails_closed() {
        let runtime = Arc::new(MockRuntime::new("I think this is a chat request."));
        let classifier = Classifier::new(runtime, None);
        assert!(matches!(
            classifier.classify("hello").await,
            Err(ClassifyError::Parse(_))
        ));
    }

    #[test]
    fn fenced_output_is_repaired() {
        let raw = "Here you go:\n```json\n{\"intent\":\"research\",\"autonomy\":\"full\",\"summary\":\"Compare vector DBs\"}\n```";
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.intent, Intent::Research);
        assert_eq!(c.autonomy, AutonomyLevel::Full);
    }

    #[test]
    fn unknown_intent_is_rejected() {
        let raw = r#"{"intent":"gossip","autonomy_level":"full","summary":"x"}"#;
        assert!(matches!(
            parse_classification(raw),
            Err(ClassifyError::Parse(msg)) if msg.contains("gossip")
        ));
    }

    #[test]
    fn blank_clarification_is_dropped() {
        let raw = r#"{"intent":"chat","autonomy_level":"supervised","summary":"Say hi","clarify_question":"  "}"#;
        let c = parse_classification(raw).unwrap();
        assert!(c.clarify_question.is_none());
        assert!(!c.needs_clarification());
    }
}
