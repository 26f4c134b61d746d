use serde::{Deserialize, Serialize};

use crate::core::memory::now_rfc3339;
use crate::core::memory::types::TaskRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    AwaitingClarification,
    Completed,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::AwaitingClarification => "awaiting_clarification",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "queued" => Some(TaskStatus::Queued),
            "running" => Some(TaskStatus::Running),
            "awaiting_clarification" => Some(TaskStatus::AwaitingClarification),
            "completed" => Some(TaskStatus::Completed),
            "error" => Some(TaskStatus::Error),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled
        )
    }
}

pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    if from == to {
        return !from.is_terminal();
    }
    match from {
        TaskStatus::Pending => matches!(
            to,
            TaskStatus::AwaitingClarification | TaskStatus::Queued | TaskStatus::Error
        ),
        TaskStatus::AwaitingClarification => {
            matches!(to, TaskStatus::Queued | TaskStatus::Cancelled)
        }
        TaskStatus::Queued => matches!(to, TaskStatus::Running),
        TaskStatus::Running => matches!(to, TaskStatus::Completed | TaskStatus::Error),
        TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Chat,
    Research,
    Automation,
    Content,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Chat => "chat",
            Intent::Research => "research",
            Intent::Automation => "automation",
            Intent::Content => "content",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "chat" => Some(Intent::Chat),
            "research" => Some(Intent::Research),
            "automation" => Some(Intent::Automation),
            "content" => Some(Intent::Content),
            _ => None,
        }
    }
}

/// How much the agent may do without asking first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    Supervised,
    Assisted,
    Full,
}

impl AutonomyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AutonomyLevel::Supervised => "supervised",
            AutonomyLevel::Assisted => "assisted",
            AutonomyLevel::Full => "full",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "supervised" => Some(AutonomyLevel::Supervised),
            "assisted" => Some(AutonomyLevel::Assisted),
            "full" => Some(AutonomyLevel::Full),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub autonomy: AutonomyLevel,
    pub summary: String,
    pub clarify_question: Option<String>,
    pub platform: Option<String>,
}

impl Classification {
    /// A clarification round-trip is needed unless the request runs with full autonomy.
    pub fn needs_clarification(&self) -> bool {
        self.clarify_question
            .as_deref()
            .is_some_and(|q| !q.trim().is_empty())
            && self.autonomy != AutonomyLevel::Full
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub thread_id: String,
    pub request: String,
    pub intent: Intent,
    pub autonomy: AutonomyLevel,
    pub summary: String,
    pub status: TaskStatus,
    pub created_at: String,
    pub updated_at: String,
    pub clarify_question: Option<String>,
    pub clarify_answer: Option<String>,
    pub pipeline: Option<String>,
    pub category: Option<String>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(thread_id: &str, request: &str, classification: &Classification) -> Self {
        let now = now_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            request: request.to_string(),
            intent: classification.intent,
            autonomy: classification.autonomy,
            summary: classification.summary.clone(),
            status: TaskStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
            clarify_question: classification.clarify_question.clone(),
            clarify_answer: None,
            pipeline: None,
            category: None,
            error: None,
        }
    }

    /// A pre-classified task fired by the scheduler. Runs unattended.
    pub fn scheduled(
        job_name: &str,
        thread_id: &str,
        prompt: &str,
        pipeline: Option<&str>,
        category: Option<&str>,
    ) -> Self {
        let classification = Classification {
            intent: if pipeline.is_some() {
                Intent::Content
            } else {
                Intent::Automation
            },
            autonomy: AutonomyLevel::Full,
            summary: format!("Scheduled job '{}'", job_name),
            clarify_question: None,
            platform: None,
        };
        let mut task = Self::new(thread_id, prompt, &classification);
        task.pipeline = pipeline.map(str::to_string);
        task.category = category.map(str::to_string);
        task
    }

    /// The request as the agent should see it, including any clarification answer.
    pub fn effective_request(&self) -> String {
        match (&self.clarify_question, &self.clarify_answer) {
            (Some(question), Some(answer)) => format!(
                "{}\n\nClarification asked: {}\nAnswer: {}",
                self.request, question, answer
            ),
            _ => self.request.clone(),
        }
    }

    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            task_id: self.id.clone(),
            thread_id: self.thread_id.clone(),
            request: self.request.clone(),
            intent: self.intent.as_str().to_string(),
            autonomy: self.autonomy.as_str().to_string(),
            summary: self.summary.clone(),
            status: self.status.as_str().to_string(),
            pipeline: self.pipeline.clone(),
            category: self.category.clone(),
            clarify_question: self.clarify_question.clone(),
            clarify_answer: self.clarify_answer.clone(),
            error: self.error.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}
