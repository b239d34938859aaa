use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::core::errors::ApiError;

const PREVIEW_CHARS: usize = 80;
const MAX_TITLE_LEN: usize = 160;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub message_count: i64,
    /// Start of the most recent message.
    #[serde(default)]
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
    pub extra: Option<Value>,
}

/// Chat sessions and their messages.
#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        title TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        extra JSON
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id)",
];

const SESSION_COLUMNS: &str = "SELECT s.id, s.title, s.created_at, s.updated_at,
        (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id) AS msg_count,
        (SELECT content FROM messages m WHERE m.session_id = s.id
         ORDER BY m.id DESC LIMIT 1) AS last_content
     FROM sessions s";

impl HistoryStore {
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, ApiError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| ApiError::internal(format!("Failed to init history schema: {}", e)))?;
        }
        Ok(Self { pool })
    }

    pub async fn create_session(&self, title: Option<String>) -> Result<String, ApiError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query("INSERT INTO sessions (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(&session_id)
            .bind(title.map(|t| clamp_title(&t)))
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to create session: {}", e)))?;

        Ok(session_id)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>, ApiError> {
        let sql = format!("{} WHERE s.id = ?", SESSION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(row.as_ref().map(row_to_session))
    }

    /// Sessions with message counts, most recently active first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>, ApiError> {
        let sql = format!("{} ORDER BY s.updated_at DESC LIMIT 100", SESSION_COLUMNS);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(rows.iter().map(row_to_session).collect())
    }

    pub async fn update_session_title(&self, session_id: &str, title: &str) -> Result<bool, ApiError> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE sessions SET title = ?, updated_at = ? WHERE id = ?")
            .bind(clamp_title(title))
            .bind(now)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() > 0)
    }

    /// Appends a message, creating the session row when it does not exist.
    pub async fn add_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        extra: Option<Value>,
    ) -> Result<i64, ApiError> {
        let now = chrono::Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("INSERT OR IGNORE INTO sessions (id, created_at, updated_at) VALUES (?, ?, ?)")
            .bind(session_id)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        let result = sqlx::query(
            "INSERT INTO messages (session_id, role, content, created_at, extra) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(now)
        .bind(extra)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;

        Ok(result.last_insert_rowid())
    }

    /// The last `limit` messages in chronological order; `limit <= 0` returns all.
    pub async fn get_history(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<HistoryMessage>, ApiError> {
        let rows = if limit > 0 {
            sqlx::query(
                "SELECT * FROM (SELECT * FROM messages WHERE session_id = ? ORDER BY id DESC LIMIT ?) ORDER BY id ASC",
            )
            .bind(session_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?
        } else {
            sqlx::query("SELECT * FROM messages WHERE session_id = ? ORDER BY id ASC")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await
                .map_err(ApiError::internal)?
        };

        rows.iter().map(row_to_message).collect()
    }

    /// Message count for one session, or across all sessions.
    pub async fn get_message_count(&self, session_id: Option<&str>) -> Result<i64, ApiError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE ?1 IS NULL OR session_id = ?1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)
    }

    pub async fn count_sessions(&self) -> Result<i64, ApiError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)
    }
}

fn row_to_message(row: &SqliteRow) -> Result<HistoryMessage, ApiError> {
    Ok(HistoryMessage {
        id: row.try_get("id").map_err(ApiError::internal)?,
        session_id: row.try_get("session_id").map_err(ApiError::internal)?,
        role: row.try_get("role").map_err(ApiError::internal)?,
        content: row.try_get("content").map_err(ApiError::internal)?,
        created_at: row.try_get("created_at").map_err(ApiError::internal)?,
        extra: row.try_get::<Option<Value>, _>("extra").unwrap_or(None),
    })
}

fn row_to_session(row: &SqliteRow) -> SessionInfo {
    let preview = row
        .try_get::<Option<String>, _>("last_content")
        .unwrap_or(None)
        .map(|content| content.chars().take(PREVIEW_CHARS).collect());

    SessionInfo {
        id: row.try_get::<String, _>("id").unwrap_or_default(),
        title: row.try_get::<Option<String>, _>("title").unwrap_or(None),
        created_at: row.try_get::<String, _>("created_at").unwrap_or_default(),
        updated_at: row.try_get::<String, _>("updated_at").unwrap_or_default(),
        message_count: row.try_get::<i64, _>("msg_count").unwrap_or(0),
        preview,
    }
}

fn clamp_title(title: &str) -> String {
    title.trim().chars().take(MAX_TITLE_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db;
    use tempfile::TempDir;

    async fn store() -> (TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("history.db")).await.unwrap();
        (dir, HistoryStore::with_pool(pool).await.unwrap())
    }

    #[tokio::test]
    async fn messages_round_trip_in_order() {
        let (_dir, store) = store().await;
        let session = store.create_session(Some("Cats".to_string())).await.unwrap();

        for i in 0..5 {
            store
                .add_message(&session, "user", &format!("message {}", i), None)
                .await
                .unwrap();
        }
        store
            .add_message(&session, "assistant", "reply", Some(serde_json::json!({ "mode": "rag" })))
            .await
            .unwrap();

        let last_three = store.get_history(&session, 3).await.unwrap();
        let contents: Vec<&str> = last_three.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["message 3", "message 4", "reply"]);
        assert_eq!(last_three[2].extra.as_ref().unwrap()["mode"], "rag");

        assert_eq!(store.get_history(&session, 0).await.unwrap().len(), 6);
        assert_eq!(store.get_message_count(Some(&session)).await.unwrap(), 6);

        let info = store.get_session(&session).await.unwrap().unwrap();
        assert_eq!(info.title.as_deref(), Some("Cats"));
        assert_eq!(info.message_count, 6);
        assert_eq!(info.preview.as_deref(), Some("reply"));
    }

    #[tokio::test]
    async fn delete_cascades_to_messages() {
        let (_dir, store) = store().await;
        let a = store.create_session(None).await.unwrap();
        store.add_message(&a, "user", "hi", None).await.unwrap();
        store.add_message("implicit", "user", "hello", None).await.unwrap();

        assert_eq!(store.count_sessions().await.unwrap(), 2);
        assert!(store.update_session_title(&a, "  Renamed ").await.unwrap());
        assert_eq!(store.get_session(&a).await.unwrap().unwrap().title.as_deref(), Some("Renamed"));

        assert!(store.delete_session(&a).await.unwrap());
        assert!(!store.delete_session(&a).await.unwrap());
        assert_eq!(store.get_message_count(None).await.unwrap(), 1);
        assert_eq!(store.list_sessions().await.unwrap().len(), 1);
    }
}
