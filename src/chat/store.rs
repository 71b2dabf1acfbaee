//! Message store and session registry
//!
//! Append-only per-session log of role-tagged messages backed by SQLite,
//! plus enumeration and creation of session identifiers. Rows are only ever
//! inserted; nothing here updates or reorders an existing message.

use crate::chat::models::{Message, MessageRole, SYSTEM_PROMPT};
use crate::error::AppError;
use chrono::Local;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

/// Database connection pool for the message log
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    /// Initialize database connection pool
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    ///
    /// # Returns
    /// * `Ok(MessageStore)` if successful
    /// * `Err(AppError)` if connection failed
    pub async fn new(db_path: &str) -> Result<Self, AppError> {
        // Ensure parent directory exists
        if let Some(parent) = PathBuf::from(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create db directory: {}", e))
            })?;
        }

        // SQLite connection string format: sqlite://path/to/db.db
        let connection_string = if db_path.starts_with("sqlite:") {
            db_path.to_string()
        } else {
            format!("sqlite:{}", db_path)
        };

        let options = SqliteConnectOptions::from_str(&connection_string)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid database path: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!("Connected to SQLite database at: {}", db_path);

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");

        let migration_sql = include_str!("../../migrations/001_create_messages.sql");

        // Remove comments (lines starting with --) and normalize whitespace
        let mut cleaned_sql = String::new();
        for line in migration_sql.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }
            // Remove inline comments (everything after --)
            let without_comments = if let Some(comment_pos) = trimmed.find("--") {
                &trimmed[..comment_pos]
            } else {
                trimmed
            };
            cleaned_sql.push_str(without_comments.trim());
            cleaned_sql.push(' ');
        }

        // Split by semicolon and execute each statement separately
        let statements: Vec<&str> = cleaned_sql
            .split(';')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// List all session identifiers known to the store
    ///
    /// Timestamp-derived identifiers sort chronologically, so identifier
    /// descending puts the newest session first.
    pub async fn list_sessions(&self) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT session_id FROM messages GROUP BY session_id ORDER BY session_id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Create a new session with a timestamp-derived identifier
    ///
    /// The session's first record is always the fixed system instruction.
    ///
    /// # Returns
    /// * `Ok(String)` - The new session identifier
    /// * `Err(AppError)` - If the underlying store is unreachable
    pub async fn create_session(&self) -> Result<String, AppError> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let session_id = format!("Diet Chat - {}", timestamp);

        // Same-second creation lands on an existing identifier; the system
        // message is inserted only once per session.
        if !self.session_exists(&session_id).await? {
            let system_message = Message::new(
                session_id.clone(),
                MessageRole::System,
                SYSTEM_PROMPT.to_string(),
            );
            self.append_message(&system_message).await?;
        }

        info!(session_id = %session_id, "Created session");
        Ok(session_id)
    }

    /// Check whether a session identifier has been created
    pub async fn session_exists(&self, session_id: &str) -> Result<bool, AppError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM messages WHERE session_id = ? LIMIT 1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.is_some())
    }

    /// Get all messages for a session, in insertion order
    ///
    /// A created session always holds at least its system message, so an
    /// empty result means the identifier was never created.
    pub async fn get_session(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT id, session_id, role, content, created_at FROM messages \
             WHERE session_id = ? ORDER BY seq ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        if messages.is_empty() {
            return Err(AppError::SessionNotFound(session_id.to_string()));
        }

        Ok(messages)
    }

    /// Append a message to a session's log
    pub async fn append_message(&self, message: &Message) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO messages (id, session_id, role, content, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        debug!(
            message_id = %message.id,
            session_id = %message.session_id,
            role = %message.role,
            "Appended message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (MessageStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = MessageStore::new(db_path.to_str().unwrap())
            .await
            .expect("Failed to create test store");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_create_session_starts_with_system_message() {
        let (store, _temp_dir) = create_test_store().await;

        let session_id = store.create_session().await.unwrap();
        assert!(session_id.starts_with("Diet Chat - "));

        let messages = store.get_session(&session_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_get_session_unknown_id() {
        let (store, _temp_dir) = create_test_store().await;

        let result = store.get_session("never created").await;
        match result {
            Err(AppError::SessionNotFound(id)) => assert_eq!(id, "never created"),
            other => panic!("Expected SessionNotFound, got {:?}", other.map(|m| m.len())),
        }
    }

    #[tokio::test]
    async fn test_messages_preserve_insertion_order() {
        let (store, _temp_dir) = create_test_store().await;
        let session_id = store.create_session().await.unwrap();

        // Identical created_at timestamps must not reorder; ordering is by
        // the insertion sequence, not the clock.
        for i in 0..10 {
            let role = if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            let message = Message::new(session_id.clone(), role, format!("message {}", i));
            store.append_message(&message).await.unwrap();
        }

        let messages = store.get_session(&session_id).await.unwrap();
        assert_eq!(messages.len(), 11);
        for (i, message) in messages[1..].iter().enumerate() {
            assert_eq!(message.content, format!("message {}", i));
        }
    }

    #[tokio::test]
    async fn test_list_sessions_distinct_and_newest_first() {
        let (store, _temp_dir) = create_test_store().await;

        // Two sessions created in the same clock second would share an
        // identifier, so build distinct ones explicitly.
        for name in ["Diet Chat - 2025-01-01 10:00:00", "Diet Chat - 2025-01-02 10:00:00"] {
            let message = Message::new(
                name.to_string(),
                MessageRole::System,
                SYSTEM_PROMPT.to_string(),
            );
            store.append_message(&message).await.unwrap();
            // A second row must not duplicate the session in the listing
            let extra = Message::new(name.to_string(), MessageRole::User, "hi".to_string());
            store.append_message(&extra).await.unwrap();
        }

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(
            sessions,
            vec![
                "Diet Chat - 2025-01-02 10:00:00".to_string(),
                "Diet Chat - 2025-01-01 10:00:00".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_session_exists() {
        let (store, _temp_dir) = create_test_store().await;

        assert!(!store.session_exists("nope").await.unwrap());
        let session_id = store.create_session().await.unwrap();
        assert!(store.session_exists(&session_id).await.unwrap());
    }
}
