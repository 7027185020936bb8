//! Chat endpoints: message processing and the opening greeting.

use axum::{
    extract::{rejection::JsonRejection, State},
    Extension, Json,
};
use serde::Serialize;
use tracing::instrument;

use crate::doctor::types::{ChatRequest, ChatResponse};
use crate::error::{AppError, AppErrorResponse, ResultExt};
use crate::middleware::RequestId;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct GreetingResponse {
    pub message: &'static str,
}

/// Malformed bodies are reported through the same 422 error shape as
/// constraint violations.
#[instrument(name = "chat::send", skip(state, request_id, payload))]
pub async fn send(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppErrorResponse> {
    let Json(request) = payload
        .map_err(|rejection| AppError::Validation(vec![rejection.body_text()]))
        .with_request_id(&request_id)?;

    let response = state
        .doctor
        .process_chat_message(request)
        .await
        .with_request_id(&request_id)?;

    if response.emergency_detected {
        tracing::warn!(
            conversation_id = response.conversation_id,
            "Emergency response returned"
        );
    }
    Ok(Json(response))
}

pub async fn greeting(State(state): State<AppState>) -> Json<GreetingResponse> {
    Json(GreetingResponse {
        message: state.doctor.greeting(),
    })
}
