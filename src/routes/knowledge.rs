//! Read-only search over the medical knowledge table.

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use tracing::instrument;

use crate::error::{AppErrorResponse, ResultExt};
use crate::middleware::RequestId;
use crate::state::AppState;
use crate::storage::KnowledgeRecord;

pub const DEFAULT_SEARCH_LIMIT: i64 = 20;
pub const MAX_SEARCH_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub topic: Option<String>,
    pub category: Option<String>,
    pub limit: Option<i64>,
}

impl SearchParams {
    fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT)
    }
}

#[instrument(name = "knowledge::search", skip(state, request_id))]
pub async fn search(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<KnowledgeRecord>>, AppErrorResponse> {
    let entries = state
        .knowledge
        .search(
            params.topic.as_deref(),
            params.category.as_deref(),
            params.limit(),
        )
        .await
        .with_request_id(&request_id)?;
    Ok(Json(entries))
}
