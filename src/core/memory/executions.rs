use anyhow::Result;
use rusqlite::{Row, params};

use super::types::{ExecutionRecord, NewExecution};
use super::{MemorySystem, clip_for_storage};

const EXECUTION_COLUMNS: &str = "record_id, session_id, task_id, tool_call_id, tool_name, input, \
     result, error, status, started_at, duration_ms";

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    Ok(ExecutionRecord {
        record_id: row.get(0)?,
        session_id: row.get(1)?,
        task_id: row.get(2)?,
        tool_call_id: row.get(3)?,
        tool_name: row.get(4)?,
        input: row.get(5)?,
        result: row.get(6)?,
        error: row.get(7)?,
        status: row.get(8)?,
        started_at: row.get(9)?,
        duration_ms: row.get(10)?,
    })
}

impl MemorySystem {
    /// Insert a `running` execution record and return its id.
    pub async fn open_execution(&self, new: &NewExecution<'_>) -> Result<String> {
        let record_id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO execution_records
                (record_id, session_id, task_id, tool_call_id, tool_name, input, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'running', ?7)",
            params![
                record_id,
                new.session_id,
                new.task_id,
                new.tool_call_id,
                new.tool_name,
                clip_for_storage(new.input),
                new.started_at,
            ],
        )?;
        Ok(record_id)
    }

    /// Close a running record. Closed records are never touched again.
    pub async fn close_execution(
        &self,
        record_id: &str,
        status: &str,
        result: Option<&str>,
        error: Option<&str>,
        duration_ms: i64,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE execution_records
             SET status = ?2, result = ?3, error = ?4, duration_ms = ?5
             WHERE record_id = ?1 AND status = 'running'",
            params![
                record_id,
                status,
                result.map(clip_for_storage),
                error.map(clip_for_storage),
                duration_ms,
            ],
        )?;
        Ok(updated > 0)
    }

    pub async fn list_executions_for_task(&self, task_id: &str) -> Result<Vec<ExecutionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM execution_records WHERE task_id = ?1 ORDER BY started_at ASC",
            EXECUTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![task_id], execution_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn list_executions_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<ExecutionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM execution_records WHERE session_id = ?1 ORDER BY started_at ASC",
            EXECUTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![session_id], execution_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
