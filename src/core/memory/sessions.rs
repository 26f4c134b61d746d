use anyhow::Result;
use rusqlite::params;

use super::{MemorySystem, now_rfc3339};

impl MemorySystem {
    /// Runtime session id bound to a conversation thread, if one exists.
    pub async fn get_session(&self, thread_id: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT session_id FROM sessions WHERE thread_id = ?1")?;
        let mut rows = stmt.query(params![thread_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    pub async fn upsert_session(&self, thread_id: &str, session_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        let now = now_rfc3339();
        db.execute(
            "INSERT INTO sessions (thread_id, session_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(thread_id) DO UPDATE SET
                 session_id = excluded.session_id,
                 updated_at = excluded.updated_at",
            params![thread_id, session_id, now],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_memory_system;

    #[tokio::test]
    async fn session_is_created_then_replaced() {
        let mem = test_memory_system().await;
        assert!(mem.get_session("C1:1").await.unwrap().is_none());

        mem.upsert_session("C1:1", "sess-a").await.unwrap();
        assert_eq!(mem.get_session("C1:1").await.unwrap().as_deref(), Some("sess-a"));

        mem.upsert_session("C1:1", "sess-b").await.unwrap();
        assert_eq!(mem.get_session("C1:1").await.unwrap().as_deref(), Some("sess-b"));
    }
}
