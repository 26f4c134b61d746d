use anyhow::Result;
use rusqlite::params;

use super::types::ScheduleRunRecord;
use super::{MemorySystem, now_rfc3339};

impl MemorySystem {
    pub async fn start_schedule_run(&self, job_name: &str) -> Result<String> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO schedule_runs (run_id, job_name, status, started_at)
             VALUES (?1, ?2, 'running', ?3)",
            params![run_id, job_name, now_rfc3339()],
        )?;
        Ok(run_id)
    }

    pub async fn finish_schedule_run(
        &self,
        run_id: &str,
        status: &str,
        error: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE schedule_runs SET status = ?2, error = ?3, finished_at = ?4 WHERE run_id = ?1",
            params![run_id, status, error, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Most recent run of each job, keyed by job name.
    pub async fn last_schedule_runs(&self) -> Result<Vec<ScheduleRunRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT r.run_id, r.job_name, r.status, r.error, r.started_at, r.finished_at
             FROM schedule_runs r
             WHERE r.started_at = (
                 SELECT MAX(started_at) FROM schedule_runs WHERE job_name = r.job_name
             )
             ORDER BY r.job_name ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ScheduleRunRecord {
                run_id: row.get(0)?,
                job_name: row.get(1)?,
                status: row.get(2)?,
                error: row.get(3)?,
                started_at: row.get(4)?,
                finished_at: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
