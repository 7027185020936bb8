//! Row types for the SQLite tables.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConversationRecord {
    pub id: i64,
    pub user_id: i64,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub patient_age: Option<i64>,
    pub patient_gender: Option<String>,
    pub chief_complaint: Option<String>,
    /// JSON object text
    pub medical_history: Option<String>,
}

impl ConversationRecord {
    /// Parsed medical history; malformed JSON is treated as absent.
    pub fn medical_history_json(&self) -> Option<serde_json::Value> {
        self.medical_history
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: i64,
    pub conversation_id: i64,
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: Option<i64>,
    pub tokens_used: Option<i64>,
    pub model_used: Option<String>,
    pub flagged_content: bool,
    /// 0-100, higher is safer
    pub safety_score: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SafetyLogRecord {
    pub id: i64,
    pub conversation_id: Option<i64>,
    pub message_id: Option<i64>,
    pub event_type: String,
    pub description: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct KnowledgeRecord {
    pub id: i64,
    pub topic: String,
    pub category: String,
    pub content: String,
    pub source: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub is_active: bool,
}
