//! Conversation-context assembly.
//!
//! Order: system prompt, optional patient context, the most recent
//! `max_history` history messages (chronological), then the current user
//! message.

use crate::llm::{MessageRole, PromptMessage};

/// Patient details known for a conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientContext {
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub medical_history: Option<serde_json::Value>,
}

impl PatientContext {
    /// One-line rendering, or `None` when nothing is known.
    pub fn render(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(age) = self.age {
            parts.push(format!("age {}", age));
        }
        if let Some(gender) = self.gender.as_deref().filter(|g| !g.is_empty()) {
            parts.push(format!("gender {}", gender));
        }
        if let Some(history) = self.medical_history.as_ref().filter(|h| !is_empty_json(h)) {
            parts.push(format!("medical history: {}", history));
        }
        if parts.is_empty() {
            None
        } else {
            Some(format!("Patient context: {}", parts.join("; ")))
        }
    }
}

fn is_empty_json(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::String(s) => s.is_empty(),
        _ => false,
    }
}

pub fn build_conversation_messages(
    system_prompt: &str,
    patient: &PatientContext,
    history: &[PromptMessage],
    max_history: usize,
    user_message: &str,
) -> Vec<PromptMessage> {
    let mut messages = vec![PromptMessage::system(system_prompt)];

    if let Some(context) = patient.render() {
        messages.push(PromptMessage::system(context));
    }

    let turns: Vec<&PromptMessage> = history
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .collect();
    let skip = turns.len().saturating_sub(max_history);
    messages.extend(turns.into_iter().skip(skip).cloned());

    messages.push(PromptMessage::user(user_message));
    messages
}
