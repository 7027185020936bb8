//! Error types surfaced by the HTTP layer.
//!
//! Handlers return [`AppErrorResponse`], which pairs an [`AppError`] with the
//! request id so the JSON error body can be correlated with logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::doctor::DoctorError;
use crate::middleware::RequestId;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(i64),

    #[error("Conversation {0} has ended")]
    ConversationEnded(i64),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DoctorError> for AppError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::ConversationNotFound(id) => AppError::ConversationNotFound(id),
            DoctorError::ConversationEnded(id) => AppError::ConversationEnded(id),
            DoctorError::InvalidRequest(errors) => AppError::Validation(errors),
            DoctorError::Storage(e) => AppError::Storage(e),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
            AppError::ConversationEnded(_) => StatusCode::CONFLICT,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to clients. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Storage(_) | AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<Uuid>,
}

/// An [`AppError`] tagged with the id of the request that produced it.
#[derive(Debug)]
pub struct AppErrorResponse {
    pub error: AppError,
    pub request_id: Option<Uuid>,
}

impl From<AppError> for AppErrorResponse {
    fn from(error: AppError) -> Self {
        Self {
            error,
            request_id: None,
        }
    }
}

impl IntoResponse for AppErrorResponse {
    fn into_response(self) -> Response {
        let status = self.error.status();
        if status.is_server_error() {
            tracing::error!(request_id = ?self.request_id, error = %self.error, "Request failed");
        } else {
            tracing::debug!(request_id = ?self.request_id, error = %self.error, "Request rejected");
        }

        let details = match &self.error {
            AppError::Validation(errors) => errors.clone(),
            _ => Vec::new(),
        };
        let body = ErrorBody {
            error: self.error.public_message(),
            details,
            request_id: self.request_id,
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        AppErrorResponse::from(self).into_response()
    }
}

/// Attaches the current request id to an error result.
pub trait ResultExt<T> {
    fn with_request_id(self, request_id: &RequestId) -> Result<T, AppErrorResponse>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<AppError>,
{
    fn with_request_id(self, request_id: &RequestId) -> Result<T, AppErrorResponse> {
        self.map_err(|e| AppErrorResponse {
            error: e.into(),
            request_id: Some(request_id.0),
        })
    }
}
