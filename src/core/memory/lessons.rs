use anyhow::Result;
use rusqlite::params;

use super::MemorySystem;
use crate::core::lessons::{LessonEntry, Severity};

impl MemorySystem {
    /// Append-only; lessons are never updated or removed.
    pub async fn append_lesson(&self, lesson: &LessonEntry) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO lessons
                (lesson_id, tool_name, error_pattern, reflection, resolution, severity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                lesson.id,
                lesson.tool_name,
                lesson.error_pattern,
                lesson.reflection,
                lesson.resolution,
                lesson.severity.as_str(),
                lesson.created_at,
            ],
        )?;
        Ok(())
    }

    /// The `limit` most recent lessons, newest first.
    pub async fn recent_lessons(&self, limit: usize) -> Result<Vec<LessonEntry>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT lesson_id, tool_name, error_pattern, reflection, resolution, severity, created_at
             FROM lessons ORDER BY seq DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let severity: String = row.get(5)?;
            Ok(LessonEntry {
                id: row.get(0)?,
                tool_name: row.get(1)?,
                error_pattern: row.get(2)?,
                reflection: row.get(3)?,
                resolution: row.get(4)?,
                severity: Severity::from_status(&severity).unwrap_or(Severity::Medium),
                created_at: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn count_lessons(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row("SELECT COUNT(*) FROM lessons", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_memory_system;
    use super::*;

    fn entry(id: &str, tool: &str) -> LessonEntry {
        LessonEntry {
            id: id.to_string(),
            tool_name: tool.to_string(),
            error_pattern: "rate limit exceeded".to_string(),
            reflection: "slow down".to_string(),
            resolution: None,
            severity: Severity::Medium,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn recent_lessons_are_newest_first_and_limited() {
        let mem = test_memory_system().await;
        for i in 0..5 {
            mem.append_lesson(&entry(&format!("l{}", i), &format!("tool{}", i)))
                .await
                .unwrap();
        }
        assert_eq!(mem.count_lessons().await.unwrap(), 5);

        let recent = mem.recent_lessons(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].tool_name, "tool4");
        assert_eq!(recent[1].tool_name, "tool3");
        assert_eq!(recent[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn duplicate_lesson_id_is_rejected() {
        let mem = test_memory_system().await;
        mem.append_lesson(&entry("same", "a")).await.unwrap();
        assert!(mem.append_lesson(&entry("same", "b")).await.is_err());
    }
}
