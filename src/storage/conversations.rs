//! Conversation repository: users, conversations, messages and safety logs.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tracing::instrument;

use super::models::{ConversationRecord, MessageRecord, SafetyLogRecord, UserRecord};
use super::{Database, StorageError};

/// Patient context recorded when a conversation starts.
#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    pub patient_age: Option<i64>,
    pub patient_gender: Option<String>,
    pub chief_complaint: Option<String>,
    pub medical_history: Option<serde_json::Value>,
}

/// A message to insert. The timestamp is assigned at insert time.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: String,
    pub content: String,
    pub response_time_ms: Option<i64>,
    pub tokens_used: Option<i64>,
    pub model_used: Option<String>,
    pub flagged_content: bool,
    pub safety_score: Option<i64>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            response_time_ms: None,
            tokens_used: None,
            model_used: None,
            flagged_content: false,
            safety_score: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            ..Self::user(content)
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSafetyLog {
    pub conversation_id: Option<i64>,
    pub message_id: Option<i64>,
    pub event_type: String,
    pub description: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ConversationStore {
    db: Database,
}

impl ConversationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &sqlx::SqlitePool {
        self.db.pool()
    }

    /// Returns the user for `session_id`, creating it if needed, and marks it active now.
    #[instrument(name = "store::get_or_create_user", skip(self))]
    pub async fn get_or_create_user(&self, session_id: &str) -> Result<UserRecord, StorageError> {
        let mut tx = self.db.pool().begin().await?;
        let user = upsert_user(&mut tx, session_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(user)
    }

    #[instrument(name = "store::create_conversation", skip(self, details))]
    pub async fn create_conversation(
        &self,
        user_id: i64,
        session_id: &str,
        details: &NewConversation,
    ) -> Result<ConversationRecord, StorageError> {
        let mut tx = self.db.pool().begin().await?;
        let id = insert_conversation(&mut tx, user_id, session_id, details, Utc::now()).await?;
        tx.commit().await?;
        self.get_conversation(id)
            .await?
            .ok_or_else(|| StorageError::Corrupt(format!("conversation {} vanished after insert", id)))
    }

    pub async fn get_conversation(&self, id: i64) -> Result<Option<ConversationRecord>, StorageError> {
        let conversation = sqlx::query_as::<_, ConversationRecord>(
            "SELECT * FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(conversation)
    }

    /// The last `limit` messages of a conversation, oldest first.
    pub async fn recent_messages(
        &self,
        conversation_id: i64,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        let mut messages = sqlx::query_as::<_, MessageRecord>(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.db.pool())
        .await?;
        messages.reverse();
        Ok(messages)
    }

    /// Every message of a conversation, oldest first.
    pub async fn all_messages(&self, conversation_id: i64) -> Result<Vec<MessageRecord>, StorageError> {
        let messages = sqlx::query_as::<_, MessageRecord>(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY id ASC",
        )
        .bind(conversation_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(messages)
    }

    /// Persists one user/assistant exchange atomically.
    ///
    /// Creates the user and (when `conversation_id` is `None`) the conversation,
    /// inserts both messages and bumps the conversation's activity timestamp.
    /// Returns `(conversation_id, assistant_message_id)`.
    ///
    /// An existing conversation must still be active when the transaction runs;
    /// otherwise nothing is written and [`StorageError::ConversationClosed`] is returned.
    #[instrument(name = "store::record_exchange", skip(self, details, user_message, assistant_message))]
    pub async fn record_exchange(
        &self,
        session_id: &str,
        conversation_id: Option<i64>,
        details: &NewConversation,
        user_message: &NewMessage,
        assistant_message: &NewMessage,
    ) -> Result<(i64, i64), StorageError> {
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let user = upsert_user(&mut tx, session_id, now).await?;
        let conversation_id = match conversation_id {
            Some(id) => {
                // Ending or expiry may have closed it since the context was loaded
                let touched = sqlx::query(
                    "UPDATE conversations SET last_message_at = ? WHERE id = ? AND is_active = 1",
                )
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                if touched.rows_affected() == 0 {
                    return Err(StorageError::ConversationClosed(id));
                }
                id
            }
            None => insert_conversation(&mut tx, user.id, session_id, details, now).await?,
        };

        insert_message(&mut tx, conversation_id, user_message, now).await?;
        let message_id = insert_message(&mut tx, conversation_id, assistant_message, now).await?;

        tx.commit().await?;
        Ok((conversation_id, message_id))
    }

    /// Marks a conversation ended. Returns false if it does not exist or already ended.
    pub async fn end_conversation(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE conversations SET is_active = 0, ended_at = ? WHERE id = ? AND is_active = 1",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ends every active conversation whose last activity is before `cutoff`.
    pub async fn expire_idle_conversations(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE conversations SET is_active = 0, ended_at = ? WHERE is_active = 1 AND last_message_at < ?",
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_safety_log(&self, log: &NewSafetyLog) -> Result<i64, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO safety_logs (conversation_id, message_id, event_type, description, severity, timestamp, resolved)
            VALUES (?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(log.conversation_id)
        .bind(log.message_id)
        .bind(&log.event_type)
        .bind(&log.description)
        .bind(&log.severity)
        .bind(log.timestamp)
        .execute(self.db.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Unresolved safety events, newest first.
    pub async fn unresolved_safety_logs(&self, limit: i64) -> Result<Vec<SafetyLogRecord>, StorageError> {
        let logs = sqlx::query_as::<_, SafetyLogRecord>(
            "SELECT * FROM safety_logs WHERE resolved = 0 ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(logs)
    }
}

async fn upsert_user(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<UserRecord, StorageError> {
    sqlx::query(
        r#"
        INSERT INTO users (session_id, created_at, last_active, is_active)
        VALUES (?, ?, ?, 1)
        ON CONFLICT(session_id) DO UPDATE SET last_active = excluded.last_active
        "#,
    )
    .bind(session_id)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    let user = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE session_id = ?")
        .bind(session_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(user)
}

async fn insert_conversation(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    session_id: &str,
    details: &NewConversation,
    now: DateTime<Utc>,
) -> Result<i64, StorageError> {
    let medical_history = details
        .medical_history
        .as_ref()
        .map(serde_json::Value::to_string);

    let result = sqlx::query(
        r#"
        INSERT INTO conversations
            (user_id, session_id, started_at, last_message_at, is_active,
             patient_age, patient_gender, chief_complaint, medical_history)
        VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(session_id)
    .bind(now)
    .bind(now)
    .bind(details.patient_age)
    .bind(&details.patient_gender)
    .bind(&details.chief_complaint)
    .bind(medical_history)
    .execute(&mut **tx)
    .await?;

    let id = result.last_insert_rowid();
    tracing::debug!(conversation_id = id, user_id, "Conversation created");
    Ok(id)
}

async fn insert_message(
    tx: &mut Transaction<'_, Sqlite>,
    conversation_id: i64,
    message: &NewMessage,
    now: DateTime<Utc>,
) -> Result<i64, StorageError> {
    let result = sqlx::query(
        r#"
        INSERT INTO messages
            (conversation_id, role, content, timestamp, response_time_ms,
             tokens_used, model_used, flagged_content, safety_score)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(conversation_id)
    .bind(&message.role)
    .bind(&message.content)
    .bind(now)
    .bind(message.response_time_ms)
    .bind(message.tokens_used)
    .bind(&message.model_used)
    .bind(message.flagged_content)
    .bind(message.safety_score)
    .execute(&mut **tx)
    .await?;
    Ok(result.last_insert_rowid())
}
