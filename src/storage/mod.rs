//! SQLite persistence for users, conversations, messages, safety logs and the
//! medical knowledge base.
//!
//! ## Modules
//!
//! - [`models`] – row types mapped with `sqlx::FromRow`
//! - [`conversations`] – `ConversationStore` (users, conversations, messages, safety logs)
//! - [`knowledge`] – `KnowledgeStore` (medical knowledge entries)

mod conversations;
mod knowledge;
mod models;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::DatabaseConfig;

pub use conversations::{ConversationStore, NewConversation, NewMessage, NewSafetyLog};
pub use knowledge::{KnowledgeStore, NewKnowledgeEntry};
pub use models::{
    ConversationRecord, KnowledgeRecord, MessageRecord, SafetyLogRecord, UserRecord,
};

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid stored data: {0}")]
    Corrupt(String),
    #[error("Invalid knowledge entry: {0}")]
    InvalidEntry(String),
    #[error("Conversation {0} is not active")]
    ConversationClosed(i64),
}

/// Schema statements, executed in order at startup.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL,
        last_active TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        session_id TEXT NOT NULL,
        started_at TEXT NOT NULL,
        last_message_at TEXT NOT NULL,
        ended_at TEXT,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        patient_age INTEGER,
        patient_gender TEXT,
        chief_complaint TEXT,
        medical_history TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_conversations_session_id ON conversations(session_id)",
    "CREATE INDEX IF NOT EXISTS idx_conversations_active ON conversations(is_active, last_message_at)",
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id INTEGER NOT NULL REFERENCES conversations(id),
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        response_time_ms INTEGER,
        tokens_used INTEGER,
        model_used TEXT,
        flagged_content BOOLEAN NOT NULL DEFAULT 0,
        safety_score INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation_id ON messages(conversation_id)",
    r#"
    CREATE TABLE IF NOT EXISTS safety_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id INTEGER REFERENCES conversations(id),
        message_id INTEGER REFERENCES messages(id),
        event_type TEXT NOT NULL,
        description TEXT NOT NULL,
        severity TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        resolved BOOLEAN NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS medical_knowledge (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        topic TEXT NOT NULL,
        category TEXT NOT NULL,
        content TEXT NOT NULL,
        source TEXT,
        last_updated TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT 1
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_medical_knowledge_topic ON medical_knowledge(topic)",
    "CREATE INDEX IF NOT EXISTS idx_medical_knowledge_category ON medical_knowledge(category)",
];

/// Shared SQLite pool; cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) the database at `config.url` and applies the schema.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StorageError> {
        tracing::info!(url = %config.url, "Initializing SQLite pool");

        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to an in-memory database is a separate database,
        // so the pool must hold exactly one connection and never recycle it.
        let pool_options = if config.url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory database with the schema applied.
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!(statements = SCHEMA.len(), "Database schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap round-trip used by the readiness check.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
