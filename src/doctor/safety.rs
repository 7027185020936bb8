//! Emergency-keyword screening and safety alert logging.
//!
//! Screening is a case-insensitive substring match against the configured
//! keyword list. Whitespace runs in the inspected text are collapsed first so
//! "chest   pain" still matches "chest pain".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SafetyConfig;
use crate::storage::{ConversationStore, NewSafetyLog, StorageError};

/// Points deducted from the safety score for each distinct keyword found
pub const EMERGENCY_KEYWORD_PENALTY: u8 = 40;

/// Score of text with nothing flagged
pub const MAX_SAFETY_SCORE: u8 = 100;

/// Result of screening one piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyCheck {
    pub is_emergency: bool,
    pub flagged_keywords: Vec<String>,
    pub flagged_content: bool,
    /// 0-100, higher is safer
    pub safety_score: u8,
}

impl SafetyCheck {
    pub fn clean() -> Self {
        Self {
            is_emergency: false,
            flagged_keywords: Vec::new(),
            flagged_content: false,
            safety_score: MAX_SAFETY_SCORE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetyAlert {
    pub alert_type: String,
    pub severity: Severity,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: Option<i64>,
    pub message_id: Option<i64>,
    pub resolved: bool,
}

impl SafetyAlert {
    pub fn new(alert_type: &str, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            alert_type: alert_type.to_string(),
            severity,
            description: description.into(),
            timestamp: Utc::now(),
            conversation_id: None,
            message_id: None,
            resolved: false,
        }
    }

    pub fn for_conversation(mut self, conversation_id: Option<i64>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn for_message(mut self, message_id: Option<i64>) -> Self {
        self.message_id = message_id;
        self
    }
}

#[derive(Clone)]
pub struct SafetyMonitor {
    enabled: bool,
    /// Lowercased, whitespace-normalized, deduplicated
    keywords: Vec<String>,
    store: ConversationStore,
}

impl SafetyMonitor {
    pub fn new(config: &SafetyConfig, store: ConversationStore) -> Self {
        let mut keywords: Vec<String> = Vec::new();
        for keyword in &config.emergency_keywords {
            let normalized = normalize(keyword);
            if !normalized.is_empty() && !keywords.contains(&normalized) {
                keywords.push(normalized);
            }
        }
        Self {
            enabled: config.enable_content_filtering,
            keywords,
            store,
        }
    }

    pub fn check_message_safety(&self, text: &str) -> SafetyCheck {
        if !self.enabled {
            return SafetyCheck::clean();
        }

        let haystack = normalize(text);
        if haystack.is_empty() {
            return SafetyCheck::clean();
        }

        let flagged_keywords: Vec<String> = self
            .keywords
            .iter()
            .filter(|keyword| haystack.contains(keyword.as_str()))
            .cloned()
            .collect();

        if flagged_keywords.is_empty() {
            return SafetyCheck::clean();
        }

        let penalty = (flagged_keywords.len() as u32) * u32::from(EMERGENCY_KEYWORD_PENALTY);
        let safety_score = u32::from(MAX_SAFETY_SCORE).saturating_sub(penalty) as u8;

        SafetyCheck {
            is_emergency: true,
            flagged_keywords,
            flagged_content: true,
            safety_score,
        }
    }

    /// Logs the alert and records it in `safety_logs`.
    pub async fn log_safety_alert(&self, alert: &SafetyAlert) -> Result<i64, StorageError> {
        if alert.severity == Severity::Critical {
            tracing::error!(
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                conversation_id = ?alert.conversation_id,
                "{}",
                alert.description
            );
        } else {
            tracing::warn!(
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                conversation_id = ?alert.conversation_id,
                message_id = ?alert.message_id,
                "{}",
                alert.description
            );
        }

        self.store
            .insert_safety_log(&NewSafetyLog {
                conversation_id: alert.conversation_id,
                message_id: alert.message_id,
                event_type: alert.alert_type.clone(),
                description: alert.description.clone(),
                severity: alert.severity.as_str().to_string(),
                timestamp: alert.timestamp,
            })
            .await
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
