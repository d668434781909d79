use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

use super::{enforce_rate_limit, invalid_body};
use crate::error::ApiError;
use crate::metrics::CHAT_LATENCY;
use crate::models::{ChatJob, ChatRequest, ChatResponse};
use crate::rate_limit::{ClientKey, EndpointClass};
use crate::security::{sanitize_message, validate_user_id};
use crate::state::AppState;

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    client: ClientKey,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    enforce_rate_limit(&state, &client, EndpointClass::Chat)?;

    let Json(request) = payload.map_err(invalid_body)?;
    let user_id = validate_user_id(&request.user_id)?;
    let message = sanitize_message(&request.message)?;

    let start_time = Instant::now();
    let (response_tx, response_rx) = oneshot::channel();

    let job = ChatJob {
        user_id: user_id.clone(),
        message,
        response_tx,
    };
    state.chat_tx.send(job).await.map_err(|_| {
        tracing::error!("agent queue is closed");
        ApiError::Unavailable
    })?;

    let outcome = response_rx
        .await
        .map_err(|_| {
            tracing::error!("agent worker dropped the reply channel");
            ApiError::Unavailable
        })?
        .map_err(|e| {
            tracing::error!(target: "security", user_id = %user_id, "chat failed");
            ApiError::from(e)
        })?;

    CHAT_LATENCY.observe(start_time.elapsed().as_secs_f64());
    tracing::info!(target: "security", user_id = %user_id, "chat interaction completed");

    Ok(Json(ChatResponse {
        response: outcome.reply,
        user_id,
        memory_count: outcome.memory_count,
    }))
}
