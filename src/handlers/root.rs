use axum::Json;
use axum::extract::State;
use std::sync::Arc;

use super::enforce_rate_limit;
use crate::error::ApiError;
use crate::rate_limit::{ClientKey, EndpointClass};
use crate::state::AppState;

pub async fn root_handler(
    State(state): State<Arc<AppState>>,
    client: ClientKey,
) -> Result<Json<serde_json::Value>, ApiError> {
    enforce_rate_limit(&state, &client, EndpointClass::Root)?;

    Ok(Json(serde_json::json!({
        "message": "Memory Gateway API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "chat": "/chat",
            "memory_search": "/memory/search",
            "clear_memory": "/memory/{user_id}",
            "metrics": "/metrics"
        }
    })))
}
