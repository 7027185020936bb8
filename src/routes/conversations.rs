//! Conversation history, summary and explicit ending.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Serialize;
use tracing::instrument;

use crate::doctor::types::{ConversationHistory, ConversationSummary};
use crate::error::{AppErrorResponse, ResultExt};
use crate::middleware::RequestId;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct EndConversationResponse {
    pub conversation_id: i64,
    pub ended: bool,
}

#[instrument(name = "conversations::history", skip(state, request_id))]
pub async fn history(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ConversationHistory>, AppErrorResponse> {
    let history = state
        .doctor
        .get_conversation_history(id)
        .await
        .with_request_id(&request_id)?;
    Ok(Json(history))
}

#[instrument(name = "conversations::summary", skip(state, request_id))]
pub async fn summary(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ConversationSummary>, AppErrorResponse> {
    let summary = state
        .doctor
        .get_conversation_summary(id)
        .await
        .with_request_id(&request_id)?;
    Ok(Json(summary))
}

/// `ended` is false when the conversation was missing or already over.
#[instrument(name = "conversations::end", skip(state, request_id))]
pub async fn end(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<EndConversationResponse>, AppErrorResponse> {
    let ended = state
        .doctor
        .end_conversation(id)
        .await
        .with_request_id(&request_id)?;
    Ok(Json(EndConversationResponse {
        conversation_id: id,
        ended,
    }))
}
