//! The chat pipeline.
//!
//! Each message is screened for emergency keywords, combined with bounded
//! conversation history into a prompt, sent to the language model, screened
//! again on the way out and persisted. Three outcomes are possible:
//!
//! - **Emergency**: the request trips the screen; a fixed emergency reply is
//!   returned, a critical alert is logged and the model is never called.
//! - **Normal**: the model reply (or the generation fallback text if the
//!   model call fails) is saved and returned with safety metadata.
//! - **Fallback**: any other failure in the pipeline yields a canned apology.

pub mod conversation;
pub mod prompt;
pub mod safety;
pub mod templates;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::instrument;

use crate::config::AppConfig;
use crate::llm::ChatModel;
use crate::storage::{ConversationStore, StorageError};

use conversation::{ConversationManager, Exchange};
use prompt::build_conversation_messages;
use safety::{SafetyAlert, SafetyCheck, SafetyMonitor, Severity};
use types::{ChatRequest, ChatResponse, ConversationHistory, ConversationSummary};

#[derive(Debug, thiserror::Error)]
pub enum DoctorError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(i64),

    #[error("Conversation {0} has ended")]
    ConversationEnded(i64),

    #[error("Invalid request: {}", .0.join("; "))]
    InvalidRequest(Vec<String>),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DoctorError {
    /// Errors the caller caused; these are reported instead of masked by the fallback reply.
    fn is_client_error(&self) -> bool {
        matches!(
            self,
            DoctorError::ConversationNotFound(_)
                | DoctorError::ConversationEnded(_)
                | DoctorError::InvalidRequest(_)
        )
    }
}

#[derive(Clone)]
pub struct AiDoctorService {
    model: Arc<dyn ChatModel>,
    safety: SafetyMonitor,
    conversations: ConversationManager,
    system_prompt: Arc<str>,
}

impl AiDoctorService {
    pub fn new(config: &AppConfig, store: ConversationStore, model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            safety: SafetyMonitor::new(&config.safety, store.clone()),
            conversations: ConversationManager::new(store, &config.conversation),
            system_prompt: Arc::from(config.conversation.system_prompt.as_str()),
        }
    }

    pub fn conversations(&self) -> &ConversationManager {
        &self.conversations
    }

    pub fn greeting(&self) -> &'static str {
        templates::GREETING
    }

    #[instrument(
        name = "doctor::process_chat_message",
        skip(self, request),
        fields(conversation_id = ?request.conversation_id)
    )]
    pub async fn process_chat_message(&self, request: ChatRequest) -> Result<ChatResponse, DoctorError> {
        request.validate().map_err(DoctorError::InvalidRequest)?;
        let start = Instant::now();

        let request_safety = self.safety.check_message_safety(&request.message);
        if request_safety.is_emergency {
            return Ok(self.handle_emergency(&request, &request_safety).await);
        }

        match self.respond(&request, &request_safety, start).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_client_error() => Err(e),
            Err(e) => {
                tracing::error!(error = %e, "Error processing chat message");
                Ok(ChatResponse::bare(
                    templates::PIPELINE_FALLBACK,
                    request.conversation_id.unwrap_or(0),
                ))
            }
        }
    }

    async fn respond(
        &self,
        request: &ChatRequest,
        request_safety: &SafetyCheck,
        start: Instant,
    ) -> Result<ChatResponse, DoctorError> {
        let context = self
            .conversations
            .get_conversation_context(request.conversation_id, request.session_id.as_deref())
            .await?;

        let messages = build_conversation_messages(
            &self.system_prompt,
            &context.patient(request),
            &context.messages,
            self.conversations.max_history(),
            request.message.trim(),
        );

        let (ai_response, tokens_used, model_used) = match self.model.complete(&messages).await {
            Ok(completion) => {
                let mut text = completion.content;
                if request.conversation_id.is_none() {
                    text = templates::with_disclaimer(&text);
                }
                (text, completion.tokens_used, Some(completion.model))
            }
            Err(e) => {
                tracing::error!(error = %e, model = %self.model.model_name(), "Error generating AI response");
                (templates::GENERATION_FALLBACK.to_string(), None, None)
            }
        };

        let response_safety = self.safety.check_message_safety(&ai_response);
        let response_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let saved = self
            .conversations
            .save_conversation(Exchange {
                request,
                conversation_session: context.conversation.as_ref().map(|c| c.session_id.as_str()),
                ai_response: &ai_response,
                response_time_ms,
                request_safety,
                response_safety: &response_safety,
                tokens_used,
                model_used: model_used.as_deref(),
            })
            .await?;

        if response_safety.flagged_content {
            let alert = SafetyAlert::new(
                "response_keyword",
                Severity::Medium,
                format!(
                    "Emergency keywords in model response: {}",
                    response_safety.flagged_keywords.join(", ")
                ),
            )
            .for_conversation(Some(saved.conversation_id))
            .for_message(Some(saved.message_id));
            // The exchange is already committed, so the reply still goes out
            if let Err(e) = self.safety.log_safety_alert(&alert).await {
                tracing::error!(
                    error = %e,
                    conversation_id = saved.conversation_id,
                    message_id = saved.message_id,
                    "Failed to persist response safety alert"
                );
            }
        }

        let suggested_next_steps = templates::generate_next_steps(&ai_response);

        Ok(ChatResponse {
            message: ai_response,
            conversation_id: saved.conversation_id,
            message_id: saved.message_id,
            session_id: Some(saved.session_id),
            timestamp: Utc::now(),
            response_time_ms: Some(response_time_ms),
            tokens_used,
            model_used,
            safety_score: Some(request_safety.safety_score),
            flagged_content: request_safety.flagged_content,
            emergency_detected: request_safety.is_emergency,
            medical_disclaimer: templates::MEDICAL_DISCLAIMER.to_string(),
            suggested_next_steps: Some(suggested_next_steps),
        })
    }

    async fn handle_emergency(&self, request: &ChatRequest, check: &SafetyCheck) -> ChatResponse {
        tracing::warn!(keywords = ?check.flagged_keywords, "Emergency detected in user message");
        let mut description = format!(
            "Emergency keywords detected: {}",
            check.flagged_keywords.join(", ")
        );

        // safety_logs.conversation_id is a foreign key; an unknown id is kept in the text only
        let conversation_id = match request.conversation_id {
            Some(id) => match self.conversations.conversation_exists(id).await {
                Ok(true) => Some(id),
                Ok(false) => {
                    description.push_str(&format!(" (unknown conversation {})", id));
                    None
                }
                Err(e) => {
                    tracing::error!(error = %e, conversation_id = id, "Failed to look up conversation");
                    description.push_str(&format!(" (conversation {})", id));
                    None
                }
            },
            None => None,
        };

        let alert = SafetyAlert::new("emergency_keyword", Severity::Critical, description)
            .for_conversation(conversation_id);

        // The emergency reply must go out even if the alert cannot be stored
        if let Err(e) = self.safety.log_safety_alert(&alert).await {
            tracing::error!(error = %e, "Failed to persist emergency alert");
        }

        ChatResponse {
            session_id: request.session_id.clone(),
            safety_score: Some(check.safety_score),
            flagged_content: true,
            emergency_detected: true,
            ..ChatResponse::bare(
                templates::EMERGENCY_RESPONSE,
                request.conversation_id.unwrap_or(0),
            )
        }
    }

    pub async fn get_conversation_history(&self, id: i64) -> Result<ConversationHistory, DoctorError> {
        self.conversations.get_conversation_history(id).await
    }

    pub async fn get_conversation_summary(&self, id: i64) -> Result<ConversationSummary, DoctorError> {
        self.conversations.get_conversation_summary(id).await
    }

    pub async fn end_conversation(&self, id: i64) -> Result<bool, DoctorError> {
        self.conversations.end_conversation(id).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted language model for pipeline tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::llm::{ChatModel, Completion, LlmError, PromptMessage};

    /// Replies with queued results in order; records every prompt it receives.
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, ()>>>,
        pub prompts: Mutex<Vec<Vec<PromptMessage>>>,
    }

    impl ScriptedModel {
        pub fn replying(replies: &[&str]) -> Self {
            let model = Self::default();
            for reply in replies {
                model.push_reply(reply);
            }
            model
        }

        pub fn push_reply(&self, reply: &str) {
            self.replies.lock().unwrap().push_back(Ok(reply.to_string()));
        }

        pub fn push_failure(&self) {
            self.replies.lock().unwrap().push_back(Err(()));
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, messages: &[PromptMessage]) -> Result<Completion, LlmError> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(content)) => Ok(Completion {
                    content,
                    tokens_used: Some(42),
                    model: "scripted".to_string(),
                }),
                _ => Err(LlmError::EmptyResponse),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }
}
