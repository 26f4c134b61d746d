use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Per-field character budget when lessons are rendered into a prompt.
pub const LESSON_FIELD_BUDGET: usize = 500;

/// How much of a failed call's input is kept in its lesson.
pub const LESSON_INPUT_BUDGET: usize = 200;

pub const INPUT_UNAVAILABLE: &str = "(input unavailable)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }
}

/// A reflection recorded after an observed tool failure. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonEntry {
    pub id: String,
    pub tool_name: String,
    pub error_pattern: String,
    pub reflection: String,
    pub resolution: Option<String>,
    pub severity: Severity,
    pub created_at: String,
}

/// Classify a raw tool error. Credential and permission failures are
/// high severity; everything else observed at the hook layer is medium.
pub fn severity_for_error(error: &str) -> Severity {
    static AUTH_STATUS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b40[13]\b").unwrap());
    let lowered = error.to_lowercase();
    const HIGH_MARKERS: &[&str] = &[
        "unauthorized",
        "forbidden",
        "permission denied",
        "invalid api key",
        "invalid_auth",
    ];
    if HIGH_MARKERS.iter().any(|m| lowered.contains(m)) || AUTH_STATUS.is_match(&lowered) {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// Build the reflection text stored alongside a failure. `input` is the
/// already-clipped view of what the tool was called with.
pub fn reflect_on_failure(tool_name: &str, input: &str, error: &str) -> String {
    let lowered = error.to_lowercase();
    let advice = if lowered.contains("rate limit") || lowered.contains("429") {
        "back off and batch requests instead of calling it in a tight loop"
    } else if lowered.contains("timeout") || lowered.contains("timed out") {
        "narrow the request or split it into smaller calls"
    } else if lowered.contains("not found") || lowered.contains("404") {
        "verify identifiers and paths before calling it"
    } else if severity_for_error(error) == Severity::High {
        "check credentials and permissions before relying on it"
    } else {
        "validate its inputs and have a fallback ready"
    };
    format!(
        "`{}` failed; next time {}.\nInput: {}",
        tool_name, advice, input
    )
}

/// Truncate to `budget` characters, appending an ellipsis when anything was cut.
pub fn truncate_field(value: &str, budget: usize) -> String {
    if value.chars().count() <= budget {
        return value.to_string();
    }
    let cut: String = value.chars().take(budget).collect();
    format!("{}…", cut)
}

/// Render lessons as a numbered preamble. An empty slice yields an empty string.
pub fn format_lessons_for_prompt(lessons: &[LessonEntry]) -> String {
    format_lessons_with_budget(lessons, LESSON_FIELD_BUDGET)
}

pub fn format_lessons_with_budget(lessons: &[LessonEntry], budget: usize) -> String {
    if lessons.is_empty() {
        return String::new();
    }

    let mut out = String::from("## Lessons from previous runs\n");
    for (idx, lesson) in lessons.iter().enumerate() {
        let resolution = lesson
            .resolution
            .as_deref()
            .map(|r| truncate_field(r, budget))
            .unwrap_or_else(|| "(unresolved)".to_string());
        out.push_str(&format!(
            "{}. [{}] {}\n   Error: {}\n   Reflection: {}\n   Resolution: {}\n",
            idx + 1,
            lesson.severity.as_str(),
            truncate_field(&lesson.tool_name, budget),
            truncate_field(&lesson.error_pattern, budget),
            truncate_field(&lesson.reflection, budget),
            resolution,
        ));
    }
    out
}
