use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use std::sync::Arc;

use super::{enforce_rate_limit, invalid_body};
use crate::error::ApiError;
use crate::metrics::UPSTREAM_FAILURES;
use crate::models::{DeleteResponse, MemorySearchRequest, MemorySearchResponse};
use crate::rate_limit::{ClientKey, EndpointClass};
use crate::security::{sanitize_text, validate_search_limit, validate_user_id};
use crate::state::AppState;

pub async fn search_memory_handler(
    State(state): State<Arc<AppState>>,
    client: ClientKey,
    payload: Result<Json<MemorySearchRequest>, JsonRejection>,
) -> Result<Json<MemorySearchResponse>, ApiError> {
    enforce_rate_limit(&state, &client, EndpointClass::MemorySearch)?;

    let Json(request) = payload.map_err(invalid_body)?;
    let user_id = validate_user_id(&request.user_id)?;
    let query = sanitize_text("query", &request.query)?;
    let limit = validate_search_limit(request.limit)?;

    let memories = state
        .memory
        .search(&user_id, &query, limit)
        .await
        .map_err(|e| {
            UPSTREAM_FAILURES.inc();
            ApiError::from(e)
        })?;

    tracing::info!(target: "security", user_id = %user_id, hits = memories.len(), "memory search performed");

    Ok(Json(MemorySearchResponse {
        count: memories.len(),
        memories,
        user_id,
    }))
}

pub async fn clear_memory_handler(
    State(state): State<Arc<AppState>>,
    client: ClientKey,
    Path(user_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    enforce_rate_limit(&state, &client, EndpointClass::MemoryDelete)?;

    let user_id = validate_user_id(&user_id)?;
    let removed = state.memory.delete_all(&user_id).await.map_err(|e| {
        UPSTREAM_FAILURES.inc();
        ApiError::from(e)
    })?;

    tracing::info!(target: "security", user_id = %user_id, removed, client = %client, "memory cleared");

    Ok(Json(DeleteResponse {
        message: format!("All memories cleared for user {}", user_id),
    }))
}
