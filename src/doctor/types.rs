//! Request and response shapes of the chat API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::MessageRole;

use super::templates::MEDICAL_DISCLAIMER;

pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const MAX_PATIENT_AGE: i64 = 120;
pub const VALID_GENDERS: &[&str] = &["male", "female", "other", "prefer_not_to_say"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<i64>,
    #[serde(default)]
    pub patient_age: Option<i64>,
    #[serde(default)]
    pub patient_gender: Option<String>,
    #[serde(default)]
    pub medical_history: Option<serde_json::Value>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Collects every constraint violation instead of stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let chars = self.message.trim().chars().count();
        if chars == 0 {
            errors.push("message must not be empty".to_string());
        } else if chars > MAX_MESSAGE_CHARS {
            errors.push(format!(
                "message must be at most {} characters",
                MAX_MESSAGE_CHARS
            ));
        }

        if let Some(age) = self.patient_age {
            if !(0..=MAX_PATIENT_AGE).contains(&age) {
                errors.push(format!("patient_age must be between 0 and {}", MAX_PATIENT_AGE));
            }
        }

        if let Some(gender) = &self.patient_gender {
            if !VALID_GENDERS.contains(&gender.to_lowercase().as_str()) {
                errors.push(format!(
                    "patient_gender must be one of: {}",
                    VALID_GENDERS.join(", ")
                ));
            }
        }

        if let Some(history) = &self.medical_history {
            if !history.is_object() {
                errors.push("medical_history must be a JSON object".to_string());
            }
        }

        if let Some(session_id) = &self.session_id {
            if session_id.trim().is_empty() || session_id.len() > 255 {
                errors.push("session_id must be 1 to 255 characters".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    pub conversation_id: i64,
    pub message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
    pub tokens_used: Option<u32>,
    pub model_used: Option<String>,

    pub safety_score: Option<u8>,
    pub flagged_content: bool,
    pub emergency_detected: bool,

    pub medical_disclaimer: String,
    pub suggested_next_steps: Option<Vec<String>>,
}

impl ChatResponse {
    /// A response with no metadata beyond the disclaimer.
    pub fn bare(message: impl Into<String>, conversation_id: i64) -> Self {
        Self {
            message: message.into(),
            conversation_id,
            message_id: 0,
            session_id: None,
            timestamp: Utc::now(),
            response_time_ms: None,
            tokens_used: None,
            model_used: None,
            safety_score: None,
            flagged_content: false,
            emergency_detected: false,
            medical_disclaimer: MEDICAL_DISCLAIMER.to_string(),
            suggested_next_steps: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub conversation_id: i64,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub messages: Vec<HistoryMessage>,

    pub patient_age: Option<i64>,
    pub patient_gender: Option<String>,
    pub chief_complaint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: i64,
    pub session_id: String,
    pub summary: String,
    pub key_topics: Vec<String>,
    pub patient_concerns: Vec<String>,
    pub suggested_follow_up: Vec<String>,
    pub created_at: DateTime<Utc>,
}
