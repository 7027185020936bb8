//! Conversation lifecycle: context loading, persistence of exchanges,
//! history/summary views and idle expiry.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::task::JoinHandle;
use tracing::instrument;
use uuid::Uuid;

use crate::config::ConversationConfig;
use crate::llm::{MessageRole, PromptMessage};
use crate::storage::{
    ConversationRecord, ConversationStore, MessageRecord, NewConversation, NewMessage,
    StorageError,
};

use super::prompt::PatientContext;
use super::safety::SafetyCheck;
use super::templates::{generate_next_steps, FOLLOW_UP, REFERRAL};
use super::types::{ChatRequest, ConversationHistory, ConversationSummary, HistoryMessage};
use super::DoctorError;

/// Stored chief complaints and summary concerns are cut to this many characters
const MAX_CONCERN_CHARS: usize = 200;

/// At most this many patient concerns appear in a summary
const MAX_SUMMARY_CONCERNS: usize = 5;

/// Upper bound on the idle timeout (100 years)
const MAX_TIMEOUT_MINUTES: i64 = 100 * 365 * 24 * 60;

/// Words reported as summary key topics, in this order
const TOPIC_WORDS: &[&str] = &[
    "pain",
    "fever",
    "headache",
    "cough",
    "fatigue",
    "sleep",
    "diet",
    "exercise",
    "stress",
    "anxiety",
    "blood pressure",
    "allergy",
    "infection",
    "medication",
    "symptoms",
];

/// History loaded for a chat request.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    /// `None` for a conversation that has not been created yet
    pub conversation: Option<ConversationRecord>,
    /// Most recent messages, oldest first
    pub messages: Vec<PromptMessage>,
}

impl ConversationContext {
    /// Patient details from the stored conversation, or from the request for a new one.
    pub fn patient(&self, request: &ChatRequest) -> PatientContext {
        match &self.conversation {
            Some(conversation) => PatientContext {
                age: conversation.patient_age,
                gender: conversation.patient_gender.clone(),
                medical_history: conversation.medical_history_json(),
            },
            None => PatientContext {
                age: request.patient_age,
                gender: request.patient_gender.as_ref().map(|g| g.to_lowercase()),
                medical_history: request.medical_history.clone(),
            },
        }
    }
}

/// Everything persisted for one completed exchange.
#[derive(Debug, Clone)]
pub struct Exchange<'a> {
    pub request: &'a ChatRequest,
    /// Session of the conversation being continued, used when the request carries none
    pub conversation_session: Option<&'a str>,
    pub ai_response: &'a str,
    pub response_time_ms: u64,
    pub request_safety: &'a SafetyCheck,
    pub response_safety: &'a SafetyCheck,
    pub tokens_used: Option<u32>,
    pub model_used: Option<&'a str>,
}

/// Identifiers of a saved exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedExchange {
    pub conversation_id: i64,
    pub message_id: i64,
    pub session_id: String,
}

#[derive(Clone)]
pub struct ConversationManager {
    store: ConversationStore,
    max_history: usize,
    idle_timeout: Duration,
    sweep_interval: StdDuration,
}

impl ConversationManager {
    pub fn new(store: ConversationStore, config: &ConversationConfig) -> Self {
        let minutes = i64::try_from(config.timeout_minutes)
            .unwrap_or(MAX_TIMEOUT_MINUTES)
            .min(MAX_TIMEOUT_MINUTES);
        Self {
            store,
            max_history: config.max_history,
            idle_timeout: Duration::minutes(minutes),
            sweep_interval: StdDuration::from_secs(config.expiry_sweep_seconds.max(1)),
        }
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Loads the conversation and its recent messages.
    ///
    /// Unknown ids and ids owned by a different session are reported as not
    /// found. A conversation idle past the timeout is ended here.
    #[instrument(name = "conversation::context", skip(self))]
    pub async fn get_conversation_context(
        &self,
        conversation_id: Option<i64>,
        session_id: Option<&str>,
    ) -> Result<ConversationContext, DoctorError> {
        let Some(id) = conversation_id else {
            return Ok(ConversationContext::default());
        };

        let conversation = self
            .store
            .get_conversation(id)
            .await?
            .ok_or(DoctorError::ConversationNotFound(id))?;

        if let Some(session_id) = session_id {
            if conversation.session_id != session_id {
                tracing::debug!(conversation_id = id, "Session does not own conversation");
                return Err(DoctorError::ConversationNotFound(id));
            }
        }

        if !conversation.is_active {
            return Err(DoctorError::ConversationEnded(id));
        }

        if Utc::now() - conversation.last_message_at > self.idle_timeout {
            self.store.end_conversation(id).await?;
            tracing::info!(conversation_id = id, "Conversation ended after inactivity");
            return Err(DoctorError::ConversationEnded(id));
        }

        let messages = self
            .store
            .recent_messages(id, self.max_history)
            .await?
            .iter()
            .map(to_prompt_message)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ConversationContext {
            conversation: Some(conversation),
            messages,
        })
    }

    /// Persists the user message and the reply; creates the conversation on first use.
    #[instrument(name = "conversation::save", skip(self, exchange))]
    pub async fn save_conversation(&self, exchange: Exchange<'_>) -> Result<SavedExchange, DoctorError> {
        let request = exchange.request;
        let session_id = request
            .session_id
            .as_deref()
            .or(exchange.conversation_session)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let details = NewConversation {
            patient_age: request.patient_age,
            patient_gender: request.patient_gender.as_ref().map(|g| g.to_lowercase()),
            chief_complaint: Some(truncate_chars(request.message.trim(), MAX_CONCERN_CHARS)),
            medical_history: request.medical_history.clone(),
        };

        let user_message = NewMessage {
            flagged_content: exchange.request_safety.flagged_content,
            safety_score: Some(i64::from(exchange.request_safety.safety_score)),
            ..NewMessage::user(request.message.trim())
        };

        let assistant_message = NewMessage {
            response_time_ms: Some(i64::try_from(exchange.response_time_ms).unwrap_or(i64::MAX)),
            tokens_used: exchange.tokens_used.map(i64::from),
            model_used: exchange.model_used.map(str::to_string),
            flagged_content: exchange.response_safety.flagged_content,
            safety_score: Some(i64::from(exchange.response_safety.safety_score)),
            ..NewMessage::assistant(exchange.ai_response)
        };

        let (conversation_id, message_id) = self
            .store
            .record_exchange(
                &session_id,
                request.conversation_id,
                &details,
                &user_message,
                &assistant_message,
            )
            .await
            .map_err(|e| match e {
                StorageError::ConversationClosed(id) => DoctorError::ConversationEnded(id),
                e => DoctorError::Storage(e),
            })?;

        tracing::debug!(conversation_id, message_id, "Exchange saved");
        Ok(SavedExchange {
            conversation_id,
            message_id,
            session_id,
        })
    }

    pub async fn get_conversation_history(&self, id: i64) -> Result<ConversationHistory, DoctorError> {
        let conversation = self
            .store
            .get_conversation(id)
            .await?
            .ok_or(DoctorError::ConversationNotFound(id))?;

        let messages = self
            .store
            .all_messages(id)
            .await?
            .iter()
            .map(|m| {
                Ok(HistoryMessage {
                    role: parse_role(m)?,
                    content: m.content.clone(),
                    timestamp: m.timestamp,
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        Ok(ConversationHistory {
            conversation_id: conversation.id,
            session_id: conversation.session_id,
            started_at: conversation.started_at,
            ended_at: conversation.ended_at,
            is_active: conversation.is_active,
            messages,
            patient_age: conversation.patient_age,
            patient_gender: conversation.patient_gender,
            chief_complaint: conversation.chief_complaint,
        })
    }

    pub async fn get_conversation_summary(&self, id: i64) -> Result<ConversationSummary, DoctorError> {
        let conversation = self
            .store
            .get_conversation(id)
            .await?
            .ok_or(DoctorError::ConversationNotFound(id))?;
        let messages = self.store.all_messages(id).await?;
        Ok(summarize(&conversation, &messages))
    }

    pub async fn conversation_exists(&self, id: i64) -> Result<bool, DoctorError> {
        Ok(self.store.get_conversation(id).await?.is_some())
    }

    /// Returns false if the conversation does not exist or has already ended.
    pub async fn end_conversation(&self, id: i64) -> Result<bool, DoctorError> {
        let ended = self.store.end_conversation(id).await?;
        if ended {
            tracing::info!(conversation_id = id, "Conversation ended");
        }
        Ok(ended)
    }

    /// Ends conversations idle for longer than the timeout.
    pub async fn expire_idle(&self) -> Result<u64, DoctorError> {
        let cutoff = Utc::now() - self.idle_timeout;
        let expired = self.store.expire_idle_conversations(cutoff).await?;
        if expired > 0 {
            tracing::info!(expired, "Ended idle conversations");
        }
        Ok(expired)
    }

    /// Spawns the periodic idle-conversation sweep.
    pub fn spawn_expiry_task(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = manager.expire_idle().await {
                    tracing::error!(error = %e, "Idle conversation sweep failed");
                }
            }
        })
    }
}

fn parse_role(message: &MessageRecord) -> Result<MessageRole, StorageError> {
    message.role.parse().map_err(|_| {
        StorageError::Corrupt(format!(
            "message {} has unknown role {:?}",
            message.id, message.role
        ))
    })
}

fn to_prompt_message(message: &MessageRecord) -> Result<PromptMessage, StorageError> {
    Ok(PromptMessage {
        role: parse_role(message)?,
        content: message.content.clone(),
    })
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn summarize(conversation: &ConversationRecord, messages: &[MessageRecord]) -> ConversationSummary {
    let all_text = messages
        .iter()
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");

    let key_topics = TOPIC_WORDS
        .iter()
        .filter(|topic| all_text.contains(*topic))
        .map(|topic| topic.to_string())
        .collect();

    let user_messages: Vec<&MessageRecord> = messages.iter().filter(|m| m.role == "user").collect();

    let patient_concerns = user_messages
        .iter()
        .take(MAX_SUMMARY_CONCERNS)
        .map(|m| truncate_chars(&m.content, MAX_CONCERN_CHARS))
        .collect();

    let assistant_text = messages
        .iter()
        .filter(|m| m.role == "assistant")
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let mut suggested_follow_up = generate_next_steps(&assistant_text);
    if messages.iter().any(|m| m.flagged_content) {
        suggested_follow_up.push(REFERRAL.to_string());
    }
    if user_messages.len() < 2 {
        suggested_follow_up.push(FOLLOW_UP.to_string());
    }

    ConversationSummary {
        conversation_id: conversation.id,
        session_id: conversation.session_id.clone(),
        summary: format!(
            "{} messages exchanged since {}",
            messages.len(),
            conversation.started_at.format("%Y-%m-%d %H:%M UTC")
        ),
        key_topics,
        patient_concerns,
        suggested_follow_up,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    async fn manager_with(timeout_minutes: u64, max_history: usize) -> (ConversationManager, ConversationStore) {
        let store = ConversationStore::new(Database::in_memory().await.unwrap());
        let config = ConversationConfig {
            max_history,
            timeout_minutes,
            ..ConversationConfig::default()
        };
        (ConversationManager::new(store.clone(), &config), store)
    }

    async fn save(manager: &ConversationManager, request: &ChatRequest, reply: &str) -> SavedExchange {
        let clean = SafetyCheck::clean();
        manager
            .save_conversation(Exchange {
                request,
                conversation_session: None,
                ai_response: reply,
                response_time_ms: 12,
                request_safety: &clean,
                response_safety: &clean,
                tokens_used: Some(30),
                model_used: Some("test-model"),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_context_for_new_conversation_is_empty() {
        let (manager, _) = manager_with(30, 10).await;
        let context = manager.get_conversation_context(None, None).await.unwrap();
        assert!(context.conversation.is_none());
        assert!(context.messages.is_empty());
    }

    #[tokio::test]
    async fn test_save_after_conversation_ended_is_rejected() {
        let (manager, store) = manager_with(30, 10).await;
        let first = save(&manager, &ChatRequest::new("Hi"), "Hello").await;

        let follow_up = ChatRequest {
            conversation_id: Some(first.conversation_id),
            ..ChatRequest::new("Another question")
        };
        manager
            .get_conversation_context(follow_up.conversation_id, None)
            .await
            .unwrap();
        assert!(manager.end_conversation(first.conversation_id).await.unwrap());

        let clean = SafetyCheck::clean();
        let err = manager
            .save_conversation(Exchange {
                request: &follow_up,
                conversation_session: Some(&first.session_id),
                ai_response: "Too late",
                response_time_ms: 5,
                request_safety: &clean,
                response_safety: &clean,
                tokens_used: None,
                model_used: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DoctorError::ConversationEnded(id) if id == first.conversation_id));
        assert_eq!(store.all_messages(first.conversation_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_conversation_exists() {
        let (manager, _) = manager_with(30, 10).await;
        let saved = save(&manager, &ChatRequest::new("Hi"), "Hello").await;
        assert!(manager.conversation_exists(saved.conversation_id).await.unwrap());
        assert!(!manager.conversation_exists(9999).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_generates_session_and_loads_back() {
        let (manager, _) = manager_with(30, 10).await;
        let request = ChatRequest {
            patient_age: Some(50),
            patient_gender: Some("MALE".to_string()),
            ..ChatRequest::new("  My knee hurts  ")
        };
        let saved = save(&manager, &request, "Knees are tricky.").await;
        assert!(Uuid::parse_str(&saved.session_id).is_ok());

        let context = manager
            .get_conversation_context(Some(saved.conversation_id), Some(&saved.session_id))
            .await
            .unwrap();
        let conversation = context.conversation.clone().unwrap();
        assert_eq!(conversation.chief_complaint.as_deref(), Some("My knee hurts"));
        assert_eq!(conversation.patient_gender.as_deref(), Some("male"));
        assert_eq!(
            context.messages,
            vec![
                PromptMessage::user("My knee hurts"),
                PromptMessage::assistant("Knees are tricky.")
            ]
        );
        assert_eq!(context.patient(&ChatRequest::new("x")).age, Some(50));
    }

    #[tokio::test]
    async fn test_context_is_bounded_by_max_history() {
        let (manager, _) = manager_with(30, 3).await;
        let first = save(&manager, &ChatRequest::new("q1"), "a1").await;
        let follow_up = ChatRequest {
            conversation_id: Some(first.conversation_id),
            session_id: Some(first.session_id.clone()),
            ..ChatRequest::new("q2")
        };
        save(&manager, &follow_up, "a2").await;

        let context = manager
            .get_conversation_context(Some(first.conversation_id), None)
            .await
            .unwrap();
        let contents: Vec<&str> = context.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a1", "q2", "a2"]);
    }

    #[tokio::test]
    async fn test_unknown_and_foreign_conversations_are_not_found() {
        let (manager, _) = manager_with(30, 10).await;
        let err = manager.get_conversation_context(Some(404), None).await.unwrap_err();
        assert!(matches!(err, DoctorError::ConversationNotFound(404)));

        let saved = save(&manager, &ChatRequest::new("hello"), "hi").await;
        let err = manager
            .get_conversation_context(Some(saved.conversation_id), Some("someone-else"))
            .await
            .unwrap_err();
        assert!(matches!(err, DoctorError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn test_ended_conversation_is_rejected() {
        let (manager, _) = manager_with(30, 10).await;
        let saved = save(&manager, &ChatRequest::new("hello"), "hi").await;
        assert!(manager.end_conversation(saved.conversation_id).await.unwrap());
        assert!(!manager.end_conversation(saved.conversation_id).await.unwrap());

        let err = manager
            .get_conversation_context(Some(saved.conversation_id), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DoctorError::ConversationEnded(_)));
    }

    #[tokio::test]
    async fn test_idle_conversation_is_ended_on_access() {
        let (manager, store) = manager_with(30, 10).await;
        let saved = save(&manager, &ChatRequest::new("hello"), "hi").await;
        let stale = Utc::now() - Duration::minutes(31);
        sqlx::query("UPDATE conversations SET last_message_at = ? WHERE id = ?")
            .bind(stale)
            .bind(saved.conversation_id)
            .execute(store_pool(&store))
            .await
            .unwrap();

        let err = manager
            .get_conversation_context(Some(saved.conversation_id), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DoctorError::ConversationEnded(_)));
        let record = store.get_conversation(saved.conversation_id).await.unwrap().unwrap();
        assert!(!record.is_active);
    }

    #[tokio::test]
    async fn test_expire_idle_sweeps_stale_conversations() {
        let (manager, store) = manager_with(30, 10).await;
        let fresh = save(&manager, &ChatRequest::new("fresh"), "hi").await;
        let stale = save(&manager, &ChatRequest::new("stale"), "hi").await;
        sqlx::query("UPDATE conversations SET last_message_at = ? WHERE id = ?")
            .bind(Utc::now() - Duration::hours(2))
            .bind(stale.conversation_id)
            .execute(store_pool(&store))
            .await
            .unwrap();

        assert_eq!(manager.expire_idle().await.unwrap(), 1);
        assert!(store.get_conversation(fresh.conversation_id).await.unwrap().unwrap().is_active);
        assert!(!store.get_conversation(stale.conversation_id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_history_and_summary() {
        let (manager, _) = manager_with(30, 10).await;
        let saved = save(
            &manager,
            &ChatRequest::new("I have a fever and a headache"),
            "Fever with headache has many causes; watch your symptoms.",
        )
        .await;

        let history = manager.get_conversation_history(saved.conversation_id).await.unwrap();
        assert_eq!(history.messages.len(), 2);
        assert_eq!(history.messages[0].role, MessageRole::User);
        assert!(history.is_active);

        let summary = manager.get_conversation_summary(saved.conversation_id).await.unwrap();
        assert!(summary.summary.starts_with("2 messages exchanged since"));
        assert_eq!(summary.key_topics, vec!["fever", "headache", "symptoms"]);
        assert_eq!(summary.patient_concerns, vec!["I have a fever and a headache"]);
        assert!(summary
            .suggested_follow_up
            .contains(&"Prepare a list of your symptoms and when they started".to_string()));
        assert_eq!(summary.suggested_follow_up.last().map(String::as_str), Some(FOLLOW_UP));
    }

    #[tokio::test]
    async fn test_summary_of_missing_conversation() {
        let (manager, _) = manager_with(30, 10).await;
        assert!(matches!(
            manager.get_conversation_summary(1).await,
            Err(DoctorError::ConversationNotFound(1))
        ));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("ééé", 2), "éé...");
    }

    fn store_pool(store: &ConversationStore) -> &sqlx::SqlitePool {
        store.pool()
    }
}
