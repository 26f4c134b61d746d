/// Audit row for a task. Upserted on every status transition.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub thread_id: String,
    pub request: String,
    pub intent: String,
    pub autonomy: String,
    pub summary: String,
    pub status: String,
    pub pipeline: Option<String>,
    pub category: Option<String>,
    pub clarify_question: Option<String>,
    pub clarify_answer: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PhaseArtifactRecord {
    pub job_id: String,
    pub phase: String,
    pub phase_index: i64,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionRecord {
    pub record_id: String,
    pub session_id: String,
    pub task_id: Option<String>,
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub status: String,
    pub started_at: String,
    pub duration_ms: Option<i64>,
}

/// Fields needed to open an execution record in the `running` state.
#[derive(Debug, Clone)]
pub struct NewExecution<'a> {
    pub session_id: &'a str,
    pub task_id: Option<&'a str>,
    pub tool_call_id: &'a str,
    pub tool_name: &'a str,
    pub input: &'a str,
    pub started_at: &'a str,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScheduleRunRecord {
    pub run_id: String,
    pub job_name: String,
    pub status: String,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}
