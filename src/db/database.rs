use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::db::models::{
    ChatHistoryEntry, ChatHistoryRow, ChatMessage, SlidePrompt, StoredChatHistory,
};
use crate::error::StorageError;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn decode_messages(raw: &str) -> Result<Vec<ChatMessage>, StorageError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(raw)?)
}

impl Database {
    pub async fn init(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to an in-memory database sees its own empty schema.
        let pool = if is_in_memory(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_history (\
                user_id TEXT NOT NULL,\
                course_id TEXT NOT NULL,\
                slide_id TEXT NOT NULL,\
                messages TEXT NOT NULL,\
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,\
                PRIMARY KEY (user_id, slide_id)\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_history_user_course ON chat_history(user_id, course_id);",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS slide_prompts (\
                slide_id TEXT PRIMARY KEY,\
                system_instruction TEXT NOT NULL,\
                initial_message TEXT NOT NULL DEFAULT ''\
            );",
        )
        .execute(&pool)
        .await?;

        info!("Database tables created successfully");

        Ok(Database { pool })
    }

    pub async fn health_check(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// All conversations of one user. No rows yields an empty vec.
    pub async fn fetch_chat_history(
        &self,
        user_id: &str,
    ) -> Result<Vec<ChatHistoryEntry>, StorageError> {
        let rows = sqlx::query_as::<_, StoredChatHistory>(
            "SELECT user_id, course_id, slide_id, messages AS messages_json, updated_at \
             FROM chat_history WHERE user_id = ? ORDER BY course_id, slide_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ChatHistoryEntry {
                    messages: decode_messages(&row.messages_json)?,
                    slide_id: row.slide_id,
                    course_id: row.course_id,
                })
            })
            .collect()
    }

    pub async fn fetch_chat_history_row(
        &self,
        user_id: &str,
        slide_id: &str,
    ) -> Result<Option<ChatHistoryRow>, StorageError> {
        let row = sqlx::query_as::<_, StoredChatHistory>(
            "SELECT user_id, course_id, slide_id, messages AS messages_json, updated_at \
             FROM chat_history WHERE user_id = ? AND slide_id = ?",
        )
        .bind(user_id)
        .bind(slide_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ChatHistoryRow {
                messages: decode_messages(&row.messages_json)?,
                user_id: row.user_id,
                course_id: row.course_id,
                slide_id: row.slide_id,
                updated_at: Some(row.updated_at),
            })
        })
        .transpose()
    }

    /// Insert-or-replace on `(user_id, slide_id)`. The stored message list is
    /// overwritten with the one given, never appended to.
    pub async fn upsert_chat_history(&self, rows: &[ChatHistoryRow]) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for row in rows {
            let messages_json = serde_json::to_string(&row.messages)?;
            sqlx::query(
                "INSERT INTO chat_history (user_id, course_id, slide_id, messages, updated_at) \
                 VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP) \
                 ON CONFLICT(user_id, slide_id) DO UPDATE SET \
                 course_id = excluded.course_id, \
                 messages = excluded.messages, \
                 updated_at = CURRENT_TIMESTAMP",
            )
            .bind(&row.user_id)
            .bind(&row.course_id)
            .bind(&row.slide_id)
            .bind(messages_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(rows = rows.len(), "Upserted chat history");
        Ok(())
    }

    pub async fn delete_chat_history(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM chat_history WHERE user_id = ? AND course_id = ?")
            .bind(user_id)
            .bind(course_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn fetch_slide_prompt(
        &self,
        slide_id: &str,
    ) -> Result<Option<SlidePrompt>, StorageError> {
        let prompt = sqlx::query_as::<_, SlidePrompt>(
            "SELECT slide_id, system_instruction, initial_message FROM slide_prompts WHERE slide_id = ?",
        )
        .bind(slide_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(prompt)
    }

    pub async fn upsert_slide_prompt(&self, prompt: &SlidePrompt) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO slide_prompts (slide_id, system_instruction, initial_message) \
             VALUES (?, ?, ?) \
             ON CONFLICT(slide_id) DO UPDATE SET \
             system_instruction = excluded.system_instruction, \
             initial_message = excluded.initial_message",
        )
        .bind(&prompt.slide_id)
        .bind(&prompt.system_instruction)
        .bind(&prompt.initial_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;

    async fn memory_db() -> Database {
        Database::init("sqlite::memory:").await.expect("in-memory db")
    }

    #[tokio::test]
    async fn fetch_for_unknown_user_is_empty() {
        let db = memory_db().await;
        let rows = db.fetch_chat_history("nobody").await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn second_upsert_replaces_messages() {
        let db = memory_db().await;
        let first = ChatHistoryRow::new(
            "u1",
            "c1",
            "s1",
            vec![ChatMessage::user("перша відповідь")],
        );
        db.upsert_chat_history(&[first]).await.unwrap();

        let replacement = vec![
            ChatMessage::ai("кейс", None),
            ChatMessage::user("друга відповідь"),
        ];
        let second = ChatHistoryRow::new("u1", "c1", "s1", replacement.clone());
        db.upsert_chat_history(&[second]).await.unwrap();

        let rows = db.fetch_chat_history("u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].messages, replacement);
        assert_eq!(rows[0].messages[0].role, Role::Ai);
    }

    #[tokio::test]
    async fn batch_upsert_writes_every_row() {
        let db = memory_db().await;
        let rows = vec![
            ChatHistoryRow::new("u1", "c1", "s2", vec![ChatMessage::user("b")]),
            ChatHistoryRow::new("u1", "c1", "s1", vec![ChatMessage::user("a")]),
            ChatHistoryRow::new("u2", "c1", "s1", vec![ChatMessage::user("other")]),
        ];
        db.upsert_chat_history(&rows).await.unwrap();

        let history = db.fetch_chat_history("u1").await.unwrap();
        let slides: Vec<_> = history.iter().map(|entry| entry.slide_id.as_str()).collect();
        assert_eq!(slides, vec!["s1", "s2"]);

        let row = db.fetch_chat_history_row("u2", "s1").await.unwrap().unwrap();
        assert_eq!(row.messages[0].text, "other");
        assert!(row.updated_at.is_some());
    }

    #[tokio::test]
    async fn delete_without_matches_is_ok() {
        let db = memory_db().await;
        let deleted = db.delete_chat_history("u1", "c404").await.unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn delete_only_touches_the_given_course() {
        let db = memory_db().await;
        let rows = vec![
            ChatHistoryRow::new("u1", "c1", "s1", vec![ChatMessage::user("a")]),
            ChatHistoryRow::new("u1", "c2", "s9", vec![ChatMessage::user("b")]),
        ];
        db.upsert_chat_history(&rows).await.unwrap();

        let deleted = db.delete_chat_history("u1", "c1").await.unwrap();
        assert_eq!(deleted, 1);

        let remaining = db.fetch_chat_history("u1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].course_id, "c2");
    }

    #[tokio::test]
    async fn slide_prompt_roundtrip_and_missing() {
        let db = memory_db().await;
        assert!(db.fetch_slide_prompt("s1").await.unwrap().is_none());

        let prompt = SlidePrompt {
            slide_id: "s1".to_string(),
            system_instruction: "Оціни відповідь. КЕЙС: Клієнт скаржиться.".to_string(),
            initial_message: "Привіт!".to_string(),
        };
        db.upsert_slide_prompt(&prompt).await.unwrap();
        assert_eq!(db.fetch_slide_prompt("s1").await.unwrap(), Some(prompt));
    }

    #[tokio::test]
    async fn queries_after_close_surface_storage_errors() {
        let db = memory_db().await;
        db.close().await;
        let err = db.fetch_chat_history("u1").await.unwrap_err();
        assert!(matches!(err, StorageError::Query(_)));
    }
}
