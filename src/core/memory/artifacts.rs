use anyhow::Result;
use rusqlite::params;

use super::types::PhaseArtifactRecord;
use super::{MemorySystem, now_rfc3339};

impl MemorySystem {
    /// Persist one phase checkpoint. Keyed by `(job_id, phase)`, so a re-run overwrites.
    pub async fn upsert_phase_artifact(
        &self,
        job_id: &str,
        phase_index: usize,
        phase: &str,
        content: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO phase_artifacts (job_id, phase, phase_index, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(job_id, phase) DO UPDATE SET
                 content = excluded.content,
                 phase_index = excluded.phase_index,
                 created_at = excluded.created_at",
            params![job_id, phase, phase_index as i64, content, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Drop every checkpoint of `job_id`, so a retried run starts clean.
    pub async fn clear_phase_artifacts(&self, job_id: &str) -> Result<usize> {
        let db = self.db.lock().await;
        let removed = db.execute(
            "DELETE FROM phase_artifacts WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(removed)
    }

    pub async fn list_phase_artifacts(&self, job_id: &str) -> Result<Vec<PhaseArtifactRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT job_id, phase, phase_index, content, created_at
             FROM phase_artifacts WHERE job_id = ?1 ORDER BY phase_index ASC",
        )?;
        let rows = stmt.query_map(params![job_id], |row| {
            Ok(PhaseArtifactRecord {
                job_id: row.get(0)?,
                phase: row.get(1)?,
                phase_index: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
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

    #[tokio::test]
    async fn artifacts_are_ordered_by_phase_and_upserted() {
        let mem = test_memory_system().await;
        mem.upsert_phase_artifact("job-1", 1, "structure", "{\"outline\":[]}")
            .await
            .unwrap();
        mem.upsert_phase_artifact("job-1", 0, "research", "notes v1")
            .await
            .unwrap();
        mem.upsert_phase_artifact("job-1", 0, "research", "notes v2")
            .await
            .unwrap();
        mem.upsert_phase_artifact("job-2", 0, "research", "other job")
            .await
            .unwrap();

        let artifacts = mem.list_phase_artifacts("job-1").await.unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].phase, "research");
        assert_eq!(artifacts[0].content, "notes v2");
        assert_eq!(artifacts[1].phase, "structure");
    }

    #[tokio::test]
    async fn clearing_removes_only_that_job() {
        let mem = test_memory_system().await;
        mem.upsert_phase_artifact("job-1", 0, "research", "a")
            .await
            .unwrap();
        mem.upsert_phase_artifact("job-1", 1, "structure", "b")
            .await
            .unwrap();
        mem.upsert_phase_artifact("job-2", 0, "research", "c")
            .await
            .unwrap();

        assert_eq!(mem.clear_phase_artifacts("job-1").await.unwrap(), 2);
        assert!(mem.list_phase_artifacts("job-1").await.unwrap().is_empty());
        assert_eq!(mem.list_phase_artifacts("job-2").await.unwrap().len(), 1);
        assert_eq!(mem.clear_phase_artifacts("missing").await.unwrap(), 0);
    }
}
