use axum::Json;
use axum::extract::State;
use std::sync::Arc;

use super::enforce_rate_limit;
use crate::error::ApiError;
use crate::models::HealthResponse;
use crate::rate_limit::{ClientKey, EndpointClass};
use crate::state::AppState;

// Liveness only, no collaborator is called
pub async fn health_handler(
    State(state): State<Arc<AppState>>,
    client: ClientKey,
) -> Result<Json<HealthResponse>, ApiError> {
    enforce_rate_limit(&state, &client, EndpointClass::Health)?;

    if state.chat_tx.is_closed() {
        tracing::error!("health check failed: agent worker is not running");
        return Err(ApiError::Unavailable);
    }

    Ok(Json(HealthResponse {
        status: "healthy",
        message: "API server is running",
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}
