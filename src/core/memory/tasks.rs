use anyhow::Result;
use rusqlite::{Row, params};

use super::MemorySystem;
use super::types::TaskRecord;

const TASK_COLUMNS: &str = "task_id, thread_id, request, intent, autonomy, summary, status, \
     pipeline, category, clarify_question, clarify_answer, error, created_at, updated_at";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        task_id: row.get(0)?,
        thread_id: row.get(1)?,
        request: row.get(2)?,
        intent: row.get(3)?,
        autonomy: row.get(4)?,
        summary: row.get(5)?,
        status: row.get(6)?,
        pipeline: row.get(7)?,
        category: row.get(8)?,
        clarify_question: row.get(9)?,
        clarify_answer: row.get(10)?,
        error: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl MemorySystem {
    pub async fn upsert_task(&self, task: &TaskRecord) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO tasks (task_id, thread_id, request, intent, autonomy, summary, status,
                 pipeline, category, clarify_question, clarify_answer, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(task_id) DO UPDATE SET
                 status = excluded.status,
                 summary = excluded.summary,
                 clarify_question = excluded.clarify_question,
                 clarify_answer = excluded.clarify_answer,
                 error = excluded.error,
                 updated_at = excluded.updated_at
             WHERE excluded.updated_at >= tasks.updated_at",
            params![
                task.task_id,
                task.thread_id,
                task.request,
                task.intent,
                task.autonomy,
                task.summary,
                task.status,
                task.pipeline,
                task.category,
                task.clarify_question,
                task.clarify_answer,
                task.error,
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM tasks WHERE task_id = ?1 LIMIT 1",
            TASK_COLUMNS
        ))?;
        let mut rows = stmt.query(params![task_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(task_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn list_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM tasks ORDER BY created_at DESC LIMIT ?1",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], task_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_memory_system;
    use super::*;

    fn record(id: &str, status: &str, created_at: &str) -> TaskRecord {
        TaskRecord {
            task_id: id.to_string(),
            thread_id: "C1:100.1".to_string(),
            request: "write a post".to_string(),
            intent: "content".to_string(),
            autonomy: "assisted".to_string(),
            summary: "Draft a post".to_string(),
            status: status.to_string(),
            pipeline: Some("long_form".to_string()),
            category: None,
            clarify_question: None,
            clarify_answer: None,
            error: None,
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_updates_status_in_place() {
        let mem = test_memory_system().await;
        mem.upsert_task(&record("t1", "queued", "2026-01-01T00:00:00Z"))
            .await
            .unwrap();

        let mut done = record("t1", "error", "2026-01-01T00:00:00Z");
        done.error = Some("phase 'structure' failed".to_string());
        done.updated_at = "2026-01-01T00:05:00Z".to_string();
        mem.upsert_task(&done).await.unwrap();

        let got = mem.get_task("t1").await.unwrap().unwrap();
        assert_eq!(got.status, "error");
        assert_eq!(got.error.as_deref(), Some("phase 'structure' failed"));
        assert_eq!(got.created_at, "2026-01-01T00:00:00Z");
        assert_eq!(got.pipeline.as_deref(), Some("long_form"));
    }

    #[tokio::test]
    async fn stale_write_does_not_regress_status() {
        let mem = test_memory_system().await;
        let mut done = record("t1", "completed", "2026-01-01T00:00:00Z");
        done.updated_at = "2026-01-01T00:09:00Z".to_string();
        mem.upsert_task(&done).await.unwrap();

        let mut stale = record("t1", "queued", "2026-01-01T00:00:00Z");
        stale.updated_at = "2026-01-01T00:01:00Z".to_string();
        mem.upsert_task(&stale).await.unwrap();

        assert_eq!(mem.get_task("t1").await.unwrap().unwrap().status, "completed");
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let mem = test_memory_system().await;
        mem.upsert_task(&record("old", "completed", "2026-01-01T00:00:00Z"))
            .await
            .unwrap();
        mem.upsert_task(&record("new", "running", "2026-01-02T00:00:00Z"))
            .await
            .unwrap();

        let all = mem.list_tasks(10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].task_id, "new");

        let one = mem.list_tasks(1).await.unwrap();
        assert_eq!(one.len(), 1);
    }

    #[tokio::test]
    async fn missing_task_is_none() {
        let mem = test_memory_system().await;
        assert!(mem.get_task("nope").await.unwrap().is_none());
    }
}
