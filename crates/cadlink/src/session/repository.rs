//! Chat session database repository.

use anyhow::{Context, Result};
use cadlink_protocol::NEW_SESSION_LABEL;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::models::{ChatMessage, ChatSession, MessageRole, now_rfc3339};

/// Repository for chat sessions and their messages.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a session. A missing or blank title falls back to `New Chat`.
    pub async fn create(&self, title: Option<&str>) -> Result<ChatSession> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(NEW_SESSION_LABEL);
        let session = ChatSession {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: now_rfc3339(),
        };

        sqlx::query("INSERT INTO chat_sessions (id, title, created_at) VALUES (?, ?, ?)")
            .bind(&session.id)
            .bind(&session.title)
            .bind(&session.created_at)
            .execute(&self.pool)
            .await
            .context("creating chat session")?;

        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ChatSession>> {
        let session = sqlx::query_as::<_, ChatSession>(
            "SELECT id, title, created_at FROM chat_sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching chat session")?;

        Ok(session)
    }

    /// All sessions, newest first.
    pub async fn list(&self) -> Result<Vec<ChatSession>> {
        let sessions = sqlx::query_as::<_, ChatSession>(
            r#"
            SELECT id, title, created_at
            FROM chat_sessions
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("listing chat sessions")?;

        Ok(sessions)
    }

    /// Change a session's title. Returns the updated session, or `None` if it
    /// does not exist.
    pub async fn rename(&self, id: &str, title: &str) -> Result<Option<ChatSession>> {
        let result = sqlx::query("UPDATE chat_sessions SET title = ? WHERE id = ?")
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("renaming chat session")?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    /// Delete a session and its messages. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("starting transaction")?;

        sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("deleting chat messages")?;

        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("deleting chat session")?;

        tx.commit().await.context("committing session delete")?;
        Ok(result.rows_affected() > 0)
    }

    /// Append a message to a session's history.
    pub async fn add_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<ChatMessage> {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now_rfc3339(),
        };

        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, session_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(&message.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("adding message to session {}", session_id))?;

        Ok(message)
    }

    /// A session's messages, oldest first.
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let messages = sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT id, session_id, role, content, created_at
            FROM chat_messages
            WHERE session_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .context("listing chat messages")?;

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn repo() -> SessionRepository {
        let db = Database::in_memory().await.unwrap();
        SessionRepository::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_create_defaults_title() {
        let repo = repo().await;
        let session = repo.create(None).await.unwrap();
        assert_eq!(session.title, "New Chat");
        assert!(Uuid::parse_str(&session.id).is_ok());

        let blank = repo.create(Some("   ")).await.unwrap();
        assert_eq!(blank.title, "New Chat");
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let repo = repo().await;
        let first = repo.create(Some("first")).await.unwrap();
        let second = repo.create(Some("second")).await.unwrap();

        let ids: Vec<String> = repo.list().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_rename() {
        let repo = repo().await;
        let session = repo.create(None).await.unwrap();

        let renamed = repo.rename(&session.id, "Bracket").await.unwrap().unwrap();
        assert_eq!(renamed.title, "Bracket");
        assert!(repo.rename("missing", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_messages_are_oldest_first() {
        let repo = repo().await;
        let session = repo.create(None).await.unwrap();
        repo.add_message(&session.id, MessageRole::User, "make a cube")
            .await
            .unwrap();
        repo.add_message(&session.id, MessageRole::Assistant, "Part.makeBox(1, 1, 1)")
            .await
            .unwrap();

        let messages = repo.list_messages(&session.id).await.unwrap();
        let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant]);
    }

    #[tokio::test]
    async fn test_message_for_unknown_session_fails() {
        let repo = repo().await;
        assert!(
            repo.add_message("missing", MessageRole::User, "hi")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_delete_removes_messages() {
        let repo = repo().await;
        let session = repo.create(None).await.unwrap();
        repo.add_message(&session.id, MessageRole::User, "hi")
            .await
            .unwrap();

        assert!(repo.delete(&session.id).await.unwrap());
        assert!(!repo.delete(&session.id).await.unwrap());
        assert!(repo.get(&session.id).await.unwrap().is_none());
        assert!(repo.list_messages(&session.id).await.unwrap().is_empty());
    }
}
