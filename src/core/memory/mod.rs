mod artifacts;
mod executions;
mod lessons;
mod schedule;
mod sessions;
mod tasks;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::lifecycle::LifecycleComponent;
use crate::platform::{NativePlatform, Platform};

/// Upper bound on tool input/result text stored per execution record.
pub(crate) const EXECUTION_TEXT_MAX_CHARS: usize = 20_000;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tasks (
        task_id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL,
        request TEXT NOT NULL,
        intent TEXT NOT NULL,
        autonomy TEXT NOT NULL,
        summary TEXT NOT NULL,
        status TEXT NOT NULL,
        pipeline TEXT,
        category TEXT,
        clarify_question TEXT,
        clarify_answer TEXT,
        error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at)",
    "CREATE TABLE IF NOT EXISTS sessions (
        thread_id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS phase_artifacts (
        job_id TEXT NOT NULL,
        phase TEXT NOT NULL,
        phase_index INTEGER NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (job_id, phase)
    )",
    "CREATE TABLE IF NOT EXISTS execution_records (
        record_id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        task_id TEXT,
        tool_call_id TEXT NOT NULL,
        tool_name TEXT NOT NULL,
        input TEXT NOT NULL,
        result TEXT,
        error TEXT,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        duration_ms INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_execution_records_task ON execution_records(task_id)",
    "CREATE TABLE IF NOT EXISTS lessons (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        lesson_id TEXT NOT NULL UNIQUE,
        tool_name TEXT NOT NULL,
        error_pattern TEXT NOT NULL,
        reflection TEXT NOT NULL,
        resolution TEXT,
        severity TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS schedule_runs (
        run_id TEXT PRIMARY KEY,
        job_name TEXT NOT NULL,
        status TEXT NOT NULL,
        error TEXT,
        started_at TEXT NOT NULL,
        finished_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_schedule_runs_job ON schedule_runs(job_name, started_at)",
];

/// SQLite-backed persistence for tasks, sessions, checkpoints, audit records and lessons.
#[derive(Clone)]
pub struct MemorySystem {
    db: Arc<Mutex<Connection>>,
    data_dir: PathBuf,
}

impl MemorySystem {
    pub async fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.exists() {
            fs::create_dir_all(&data_dir).await?;
        }
        NativePlatform::restrict_dir_permissions(&data_dir);

        let db_path = data_dir.join("relay.db");
        let db = Connection::open(&db_path)?;
        NativePlatform::restrict_file_permissions(&db_path);

        for statement in SCHEMA {
            db.execute(statement, [])?;
        }

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Fixed-width UTC timestamp, so stored values sort lexicographically.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn clip_for_storage(text: &str) -> String {
    if text.chars().count() > EXECUTION_TEXT_MAX_CHARS {
        let cut: String = text.chars().take(EXECUTION_TEXT_MAX_CHARS).collect();
        format!("{}... [truncated]", cut)
    } else {
        text.to_string()
    }
}

#[async_trait]
impl LifecycleComponent for MemorySystem {
    async fn on_init(&mut self) -> Result<()> {
        info!("Memory system initializing at {}", self.data_dir.display());
        Ok(())
    }
}

/// Create a MemorySystem in a fresh temp directory for testing.
#[cfg(test)]
pub async fn test_memory_system() -> MemorySystem {
    let tmpdir = std::env::temp_dir().join(format!("relay-test-{}", uuid::Uuid::new_v4()));
    MemorySystem::new(&tmpdir)
        .await
        .expect("create test memory system")
}
